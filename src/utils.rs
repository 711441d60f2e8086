use crate::hmd::HmdError;

/// Turns a failed runtime call into a logged [`HmdError::Runtime`].
pub(crate) trait XrCheck<T> {
    fn check(self, context: &str) -> Result<T, HmdError>;
}

impl<T, E> XrCheck<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn check(self, context: &str) -> Result<T, HmdError> {
        self.map_err(|e| {
            log::error!("{context}: {e}");
            HmdError::Runtime {
                context: context.to_owned(),
                source: Box::new(e),
            }
        })
    }
}
