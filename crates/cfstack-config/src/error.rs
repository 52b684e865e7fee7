use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("api_url must be set (or CF_API_URL)")]
    MissingApiUrl,

    #[error("api_url is not an http(s) URL: {0}")]
    InvalidApiUrl(String),

    #[error(
        "no credentials configured. Set one of:\n\
        - user + password\n\
        - client_id + client_secret\n\
        - sso_passcode"
    )]
    MissingCredentials,

    #[error("password must be set when user is set")]
    MissingPassword,

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("provider configuration must be an object")]
    NotAnObject,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
