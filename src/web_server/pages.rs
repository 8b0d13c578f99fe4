//! Page routes. These only render; the live page drives the session through
//! the JSON API.

use super::prelude::*;

pub(crate) struct Card {
    pub title: &'static str,
    pub description: &'static str,
    pub href: &'static str,
}

/// Landing and placeholder pages
#[derive(Template, WebTemplate)]
#[template(path = "page.html")]
pub(crate) struct PageTemplate {
    title: &'static str,
    subtitle: &'static str,
    back: Option<&'static str>,
    cards: Vec<Card>,
}

/// Live static-gesture page
#[derive(Template, WebTemplate)]
#[template(path = "live.html")]
pub(crate) struct LiveTemplate {
    live: bool,
    domain: String,
    label: String,
    error: String,
    frame_rate: u32,
    accuracy: String,
    processing_load: String,
    memory_usage: String,
    capture_interval_ms: u128,
}

impl LiveTemplate {
    fn from_snapshot(snapshot: &SessionSnapshot, capture_interval_ms: u128) -> Self {
        Self {
            live: snapshot.is_live(),
            domain: snapshot.domain.to_string(),
            label: snapshot.current_label.clone(),
            error: snapshot.last_error.clone().unwrap_or_default(),
            frame_rate: snapshot.frame_rate,
            accuracy: format!("{:.1}", snapshot.accuracy),
            processing_load: format!("{:.0}", snapshot.processing_load),
            memory_usage: format!("{:.0}", snapshot.memory_usage),
            capture_interval_ms,
        }
    }
}

fn render<T: Template>(template: T) -> Result<Html<String>, (StatusCode, &'static str)> {
    template.render().map(Html::from).map_err(|e| {
        error!("Failed to render template: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
        )
    })
}

pub(crate) async fn home() -> Result<Html<String>, (StatusCode, &'static str)> {
    render(PageTemplate {
        title: "Sign Language Recognition",
        subtitle: "Real-time gesture recognition from your webcam",
        back: None,
        cards: vec![
            Card {
                title: "Indian Sign Language",
                description: "Static and dynamic ISL gestures",
                href: "/isl",
            },
            Card {
                title: "American Sign Language",
                description: "ASL fingerspelling",
                href: "/asl",
            },
        ],
    })
}

pub(crate) async fn isl() -> Result<Html<String>, (StatusCode, &'static str)> {
    render(PageTemplate {
        title: "Indian Sign Language",
        subtitle: "Pick a recognition mode",
        back: Some("/"),
        cards: vec![
            Card {
                title: "Static Gestures",
                description: "Alphabet and numeral hand shapes, one frame at a time",
                href: "/isl/static",
            },
            Card {
                title: "Dynamic Gestures",
                description: "Words and phrases made of motion",
                href: "/isl/dynamic",
            },
        ],
    })
}

pub(crate) async fn asl() -> Result<Html<String>, (StatusCode, &'static str)> {
    render(PageTemplate {
        title: "American Sign Language",
        subtitle: "Not available yet",
        back: Some("/"),
        cards: Vec::new(),
    })
}

pub(crate) async fn isl_dynamic() -> Result<Html<String>, (StatusCode, &'static str)> {
    render(PageTemplate {
        title: "ISL - Dynamic Gesture Recognition",
        subtitle: "Not available yet",
        back: Some("/isl"),
        cards: Vec::new(),
    })
}

#[axum::debug_handler]
pub(crate) async fn isl_static(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    let snapshot = state.session.snapshot();
    debug!("Rendering live page in {:?} state", snapshot.status);
    render(LiveTemplate::from_snapshot(
        &snapshot,
        state.settings.capture_interval.as_millis(),
    ))
}
