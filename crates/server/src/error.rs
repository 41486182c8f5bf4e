//! Error-to-HTTP mapping, rendered in the client's native error schema.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use transllm::{Provider, TransLLMError};

#[derive(Debug)]
pub(crate) enum ProxyError {
    /// A translation failure inside the engine.
    Engine(TransLLMError),
    /// The upstream rejected the request; status and body pass through
    /// untouched so the client sees what the vendor said.
    Upstream { status: StatusCode, body: String },
    /// The upstream could not be reached at all.
    Connection(String),
}

impl From<TransLLMError> for ProxyError {
    fn from(err: TransLLMError) -> Self {
        ProxyError::Engine(err)
    }
}

impl ProxyError {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ProxyError::Engine(TransLLMError::Validation { .. }) => StatusCode::BAD_REQUEST,
            ProxyError::Engine(TransLLMError::UnsupportedProvider { .. })
            | ProxyError::Engine(TransLLMError::UnsupportedFeature { .. }) => StatusCode::NOT_IMPLEMENTED,
            ProxyError::Engine(TransLLMError::Conversion { .. }) => StatusCode::BAD_GATEWAY,
            ProxyError::Engine(TransLLMError::Idempotency { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Connection(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Upstream { status, .. } => *status,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Engine(TransLLMError::Validation { .. }) => "invalid_request_error",
            ProxyError::Engine(TransLLMError::UnsupportedProvider { .. })
            | ProxyError::Engine(TransLLMError::UnsupportedFeature { .. }) => "not_supported_error",
            ProxyError::Engine(TransLLMError::Conversion { .. }) | ProxyError::Connection(_) => "api_error",
            ProxyError::Engine(TransLLMError::Idempotency { .. }) => "internal_error",
            ProxyError::Upstream { .. } => "api_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ProxyError::Engine(err) => err.to_string(),
            ProxyError::Connection(message) => message.clone(),
            ProxyError::Upstream { body, .. } => body.clone(),
        }
    }

    /// Render for a client speaking `dialect`.
    pub(crate) fn into_response_for(self, dialect: Provider) -> Response {
        if let ProxyError::Upstream { status, body } = self {
            return (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response();
        }

        let status = self.status();
        let body = error_body(dialect, status, self.error_type(), &self.message());

        (status, axum::Json(body)).into_response()
    }
}

/// The error document each dialect's clients expect.
pub(crate) fn error_body(dialect: Provider, status: StatusCode, error_type: &str, message: &str) -> Value {
    match dialect {
        Provider::Anthropic => json!({
            "type": "error",
            "error": {"type": error_type, "message": message}
        }),
        Provider::OpenAi => json!({
            "error": {"message": message, "type": error_type, "code": status.as_u16()}
        }),
        Provider::Gemini => json!({
            "error": {"code": status.as_u16(), "message": message, "status": error_type}
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    #[test]
    fn each_dialect_gets_its_native_error_schema() {
        let status = StatusCode::BAD_REQUEST;

        assert_json_snapshot!(
            error_body(Provider::Anthropic, status, "invalid_request_error", "bad input"),
            @r#"
        {
          "error": {
            "message": "bad input",
            "type": "invalid_request_error"
          },
          "type": "error"
        }
        "#
        );

        assert_json_snapshot!(
            error_body(Provider::OpenAi, status, "invalid_request_error", "bad input"),
            @r#"
        {
          "error": {
            "code": 400,
            "message": "bad input",
            "type": "invalid_request_error"
          }
        }
        "#
        );

        assert_json_snapshot!(
            error_body(Provider::Gemini, status, "invalid_request_error", "bad input"),
            @r#"
        {
          "error": {
            "code": 400,
            "message": "bad input",
            "status": "invalid_request_error"
          }
        }
        "#
        );
    }

    #[test]
    fn engine_errors_map_to_the_documented_status_codes() {
        let validation = ProxyError::Engine(TransLLMError::Validation {
            errors: vec!["contents: missing".to_string()],
        });
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let unsupported = ProxyError::Engine(TransLLMError::unsupported_feature(
            "image_input",
            Provider::OpenAi,
        ));
        assert_eq!(unsupported.status(), StatusCode::NOT_IMPLEMENTED);

        let conversion = ProxyError::Engine(TransLLMError::conversion(
            Provider::OpenAi,
            Provider::Gemini,
            "boom",
        ));
        assert_eq!(conversion.status(), StatusCode::BAD_GATEWAY);

        let connection = ProxyError::Connection("refused".to_string());
        assert_eq!(connection.status(), StatusCode::BAD_GATEWAY);
    }
}
