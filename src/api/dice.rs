use crate::api::AppState;
use crate::error::Result;
use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};

/// Relays one roll from the dice service. The body is returned byte for byte.
pub async fn roll_dice(State(state): State<AppState>) -> Result<Response> {
    let roll = state.dice_service.roll().await?;

    let mut response = roll.body.into_response();
    if let Some(content_type) = roll.content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    } else {
        response.headers_mut().remove(CONTENT_TYPE);
    }
    Ok(response)
}
