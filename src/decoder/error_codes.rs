//! Device error codes (`E?`).

use serde::Serialize;

use crate::error::ProtocolError;

struct ErrorCodeEntry {
    code: u32,
    message: &'static str,
    suggestion: Option<&'static str>,
}

static ERROR_CODES: &[ErrorCodeEntry] = &[
    ErrorCodeEntry {
        code: 0,
        message: "No errors",
        suggestion: None,
    },
    ErrorCodeEntry {
        code: 100,
        message: "No application is currently loaded in the sensor.",
        suggestion: Some(
            "Some commands require a running application to be loaded. If this is not the case, an error occurs.",
        ),
    },
    ErrorCodeEntry {
        code: 105,
        message: "Invalid input parameter",
        suggestion: Some(
            "Read the command documentation to send the required information to the sensor.",
        ),
    },
    ErrorCodeEntry {
        code: 108,
        message: "The sensor is in an operation mode which does not permit the execution of commands.",
        suggestion: Some("Check the command documentation to see when the command can be executed."),
    },
    ErrorCodeEntry {
        code: 110,
        message: "Fatal internal error.",
        suggestion: Some("Reboot the sensor."),
    },
    ErrorCodeEntry {
        code: 902,
        message: "Application to be activated not found.",
        suggestion: Some(
            "Check whether the application number is correct. Check also if the application can be edited using the PC Software.",
        ),
    },
    ErrorCodeEntry {
        code: 1000,
        message: "It is not possible to trigger the sensor because trigger function via TCP/IP is not active.",
        suggestion: Some("Review the sensor configuration to change the sensor trigger mode."),
    },
    ErrorCodeEntry {
        code: 1300,
        message: "Internal fault during the image transmission from / to the sensor.",
        suggestion: Some(
            "Check which is the required image format and if all parameters for the results via TCP/IP are correct. In case of a problem during the transmission of information, check whether the information to be sent is correct.",
        ),
    },
    ErrorCodeEntry {
        code: 1600,
        message: "The user tries to obtain a result although no results are available in the sensor.",
        suggestion: None,
    },
    ErrorCodeEntry {
        code: 1601,
        message: "The command cannot be executed because the sensor is currently decoding.",
        suggestion: Some("Try to execute the command again."),
    },
    ErrorCodeEntry {
        code: 1602,
        message: "An image is uploaded to the sensor for evaluation. The format detected does not match that of the currently activated application.",
        suggestion: Some("Edit the running application to check which is the required image format."),
    },
    ErrorCodeEntry {
        code: 1603,
        message: "It is not possible to upload an application to the sensor if the external selection of the application is activated.",
        suggestion: Some("Use the PC Software to deactivate the external selection of the application."),
    },
    ErrorCodeEntry {
        code: 1604,
        message: "The user sends a trigger to the device via TCP/IP. Due to an internal fault the sensor cannot process the trigger.",
        suggestion: Some(
            "This error code shows a sensor failure. Normally the sensor tries to remedy the failure itself. If this error occurs again, reboot the sensor.",
        ),
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ErrorCodeInfo {
    Known {
        code: u32,
        message: &'static str,
        suggestion: Option<&'static str>,
    },
    UnknownErrorCode(u32),
}

impl ErrorCodeInfo {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCodeInfo::Known { code, .. } => *code,
            ErrorCodeInfo::UnknownErrorCode(code) => *code,
        }
    }

    pub fn is_error(&self) -> bool {
        self.code() != 0
    }
}

/// Look up a numeric code in the static table.
pub fn lookup_error_code(code: u32) -> ErrorCodeInfo {
    ERROR_CODES
        .iter()
        .find(|entry| entry.code == code)
        .map(|entry| ErrorCodeInfo::Known {
            code: entry.code,
            message: entry.message,
            suggestion: entry.suggestion,
        })
        .unwrap_or(ErrorCodeInfo::UnknownErrorCode(code))
}

/// Decode an `E?` payload: a decimal code with leading zeros (4 or 8 digits).
pub fn decode_error_code(payload: &[u8]) -> Result<ErrorCodeInfo, ProtocolError> {
    if !(payload.len() == 4 || payload.len() == 8) || !payload.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::malformed(format!(
            "error code {:?} is not a 4 or 8 digit decimal",
            String::from_utf8_lossy(payload)
        )));
    }
    let code = payload
        .iter()
        .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
    Ok(lookup_error_code(code))
}
