//! Output helpers: JSON printing and structured error rendering.

use fleetmux_core::Error as CoreError;

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Render an error as a `{code, message}` JSON object on stderr.
///
/// Automated callers assert on `code`; the message is for humans.
pub fn print_error(err: &anyhow::Error) {
    let code = err
        .downcast_ref::<CoreError>()
        .map_or("UNKNOWN", |core| core.code().as_str());
    let payload = serde_json::json!({
        "code": code,
        "message": err.to_string(),
    });
    eprintln!("{payload}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_maps_to_code() {
        let err = anyhow::Error::new(CoreError::NotFound("session".to_string()));
        let code = err
            .downcast_ref::<CoreError>()
            .map_or("UNKNOWN", |core| core.code().as_str());
        assert_eq!(code, "NOT_FOUND");
    }

    #[test]
    fn test_foreign_error_is_unknown() {
        let err = anyhow::anyhow!("something else");
        let code = err
            .downcast_ref::<CoreError>()
            .map_or("UNKNOWN", |core| core.code().as_str());
        assert_eq!(code, "UNKNOWN");
    }
}
