use super::KspError;

pub type KspResult<R> = Result<R, KspError>;
