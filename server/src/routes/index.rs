//! Upload page

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use burn::prelude::Backend;

use crate::state::SharedState;

/// GET / - serves `index.html` from the static directory
pub async fn index<B: Backend>(
    State(state): State<SharedState<B>>,
) -> Result<Html<String>, (StatusCode, String)> {
    let path = state.config.static_dir.join("index.html");
    tokio::fs::read_to_string(&path)
        .await
        .map(Html)
        .map_err(|e| (StatusCode::NOT_FOUND, format!("{}: {}", path.display(), e)))
}
