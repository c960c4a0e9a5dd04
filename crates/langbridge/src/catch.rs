use langbridge_core::error::BridgeError;

/// Convert foreign error types into [`BridgeError`] at the facade boundary.
pub trait Catch<T>: Sized {
    fn catch(self) -> Result<T, BridgeError>;
}

impl<T, E: Into<BridgeError>> Catch<T> for Result<T, E> {
    fn catch(self) -> Result<T, BridgeError> {
        self.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_through_catch() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        assert!(matches!(result.catch(), Err(BridgeError::Io(_))));
    }

    #[test]
    fn anyhow_errors_convert_through_catch() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("boom"));
        assert!(matches!(result.catch(), Err(BridgeError::Other(_))));
    }

    #[test]
    fn ok_values_pass_through() {
        let result: Result<u32, std::io::Error> = Ok(7);
        assert_eq!(result.catch().unwrap(), 7);
    }
}
