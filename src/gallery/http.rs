//! HTTP implementation of the games gateway client.

use super::{Game, GamePatch, GameStore, GalleryError, Visibility, validate_save, validate_title};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SaveRequest<'a> {
    title: &'a str,
    html: &'a str,
    status: Visibility,
}

#[derive(Deserialize)]
struct GameEnvelope {
    game: Game,
}

#[derive(Deserialize)]
struct GamesEnvelope {
    games: Vec<Game>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
}

pub struct HttpGameStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpGameStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<R, GalleryError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, %method, "gateway call");

        let mut request = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GalleryError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GalleryError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(error_for(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| GalleryError::Response(e.to_string()))
    }
}

fn error_for(status: StatusCode, body: &str) -> GalleryError {
    match status {
        StatusCode::UNAUTHORIZED => GalleryError::Unauthorized,
        StatusCode::FORBIDDEN => GalleryError::Forbidden,
        StatusCode::NOT_FOUND => GalleryError::NotFound,
        _ => {
            let message = serde_json::from_str::<ErrorEnvelope>(body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| body.to_string());
            GalleryError::Gateway {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl GameStore for HttpGameStore {
    async fn save(
        &self,
        title: &str,
        markup: &str,
        visibility: Visibility,
    ) -> Result<Game, GalleryError> {
        validate_save(title, markup)?;
        let body = serde_json::to_value(SaveRequest {
            title: title.trim(),
            html: markup,
            status: visibility,
        })
        .map_err(|e| GalleryError::Response(e.to_string()))?;

        let envelope: GameEnvelope = self
            .call(Method::POST, "/api/games/save", Some(body))
            .await?;
        Ok(envelope.game)
    }

    async fn list(&self) -> Result<Vec<Game>, GalleryError> {
        let envelope: GamesEnvelope = self.call(Method::GET, "/api/games/list", None).await?;
        Ok(envelope.games)
    }

    async fn explore(&self) -> Result<Vec<Game>, GalleryError> {
        let envelope: GamesEnvelope = self.call(Method::GET, "/api/games/public", None).await?;
        Ok(envelope.games)
    }

    async fn update(&self, id: &str, patch: &GamePatch) -> Result<Game, GalleryError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        let body = serde_json::to_value(patch).map_err(|e| GalleryError::Response(e.to_string()))?;

        let envelope: GameEnvelope = self
            .call(Method::PATCH, &format!("/api/games/{id}/update"), Some(body))
            .await?;
        Ok(envelope.game)
    }

    async fn delete(&self, id: &str) -> Result<(), GalleryError> {
        let _: serde_json::Value = self
            .call(Method::DELETE, &format!("/api/games/{id}/delete"), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_request_wire_shape() {
        let req = SaveRequest {
            title: "Flappy Cat",
            html: "<html></html>",
            status: Visibility::Private,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Flappy Cat",
                "html": "<html></html>",
                "status": "PRIVATE"
            })
        );
    }

    #[test]
    fn test_error_for_maps_auth_statuses() {
        assert!(matches!(
            error_for(StatusCode::UNAUTHORIZED, "{}"),
            GalleryError::Unauthorized
        ));
        assert!(matches!(
            error_for(StatusCode::FORBIDDEN, "{}"),
            GalleryError::Forbidden
        ));
        assert!(matches!(
            error_for(StatusCode::NOT_FOUND, "{}"),
            GalleryError::NotFound
        ));
    }

    #[test]
    fn test_error_for_extracts_gateway_message() {
        let err = error_for(
            StatusCode::BAD_REQUEST,
            r#"{"message": "Game title is required"}"#,
        );
        let GalleryError::Gateway { status, message } = err else {
            panic!("expected gateway error");
        };
        assert_eq!(status, 400);
        assert_eq!(message, "Game title is required");
    }

    #[test]
    fn test_error_for_falls_back_to_raw_body() {
        let err = error_for(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let GalleryError::Gateway { message, .. } = err else {
            panic!("expected gateway error");
        };
        assert_eq!(message, "boom");
    }

    #[test]
    fn test_games_envelope_parses_listing() {
        let envelope: GamesEnvelope = serde_json::from_str(
            r#"{"message": "ok", "games": [
                {"id": "g-1", "title": "A", "status": "PUBLIC"},
                {"id": "g-2", "title": "B", "status": "PRIVATE", "html": "<p/>"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(envelope.games.len(), 2);
        assert_eq!(envelope.games[1].source_markup.as_deref(), Some("<p/>"));
    }
}
