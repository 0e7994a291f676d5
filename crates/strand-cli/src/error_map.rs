use std::fmt::Display;

use strand_core::StrandError;

fn map_error(code: &'static str, error: impl Display) -> StrandError {
    StrandError::new(code, error.to_string())
}

pub(crate) fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("{:?}", text))
}

pub(crate) fn emit_error(error: StrandError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    if let Some(line) = error.line {
        println!("ERROR_LINE:{}", line);
    }
    println!("ERROR_MSG_JSON:{}", json_string(&error.message));
    1
}

pub(crate) fn map_cli_program_read(error: std::io::Error) -> StrandError {
    map_error("CLI_PROGRAM_READ", error)
}

pub(crate) fn map_cli_check_path(error: std::io::Error) -> StrandError {
    map_error("CLI_CHECK_PATH", error)
}

pub(crate) fn map_cli_check_scan(error: walkdir::Error) -> StrandError {
    map_error("CLI_CHECK_SCAN", error)
}

pub(crate) fn map_cli_case_invalid(error: serde_json::Error) -> StrandError {
    map_error("CLI_CASE_INVALID", error)
}
