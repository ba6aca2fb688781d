use axum::{
    extract::{Form, State},
    response::{Html, IntoResponse},
};
use minijinja::context;
use serde::Deserialize;
use std::sync::Arc;

use crate::web::state::AppState;
use crate::web::templates::{INDEX_TEMPLATE, render_template};

#[derive(Debug, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    pub question: String,
}

// Main UI entry point
pub async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Html(render_template(
        &state.template_env,
        INDEX_TEMPLATE,
        context! {
            question => "",
            recall_status => state.recall_status.to_string(),
        },
    ))
}

// Form submission: run the pipeline and render every stage's output
pub async fn ask_form_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AskForm>,
) -> impl IntoResponse {
    let report = state.assistant.ask(&form.question).await;
    let failure_message = report.failure.as_ref().map(|failure| failure.message());

    Html(render_template(
        &state.template_env,
        INDEX_TEMPLATE,
        context! {
            question => form.question,
            recall_status => state.recall_status.to_string(),
            report => report,
            failure_message => failure_message,
        },
    ))
}
