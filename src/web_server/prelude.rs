pub use std::sync::Arc;

pub(crate) use axum::{
    extract::State,
    response::{Html, Json},
};

pub(crate) use askama::Template;
pub(crate) use askama_web::WebTemplate;

pub(crate) use axum::http::StatusCode;
pub(crate) use serde::{Deserialize, Serialize};

pub(crate) use crate::protocol::{ApiResponse, Domain, SessionSnapshot, Visibility};
pub(crate) use crate::server::AppState;
pub(crate) use tracing::{debug, error, info, warn};
