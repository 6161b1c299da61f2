//! Server-rendered block explorer: a block list at `/` and a mining form at
//! `/add`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::ApiNode;
use crate::blockchain::Block;

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>{title} | nomadcoin</title>
</head>
<body>
  <header>
    <nav>
      <a href="/"><strong>nomadcoin</strong></a>
      <a href="/add">Add</a>
    </nav>
    <h1>{title}</h1>
  </header>
  <main>
{body}
  </main>
</body>
</html>
"#,
        title = escape(title),
        body = body
    ))
}

fn render_block(out: &mut String, block: &Block) {
    let _ = write!(
        out,
        r#"    <section>
      <h3>Block {height}</h3>
      <ul>
        <li>Hash: {hash}</li>"#,
        height = block.height,
        hash = escape(&block.hash),
    );
    if !block.previous_hash.is_empty() {
        let _ = write!(
            out,
            "\n        <li>Previous hash: {}</li>",
            escape(&block.previous_hash)
        );
    }
    let _ = write!(
        out,
        r#"
        <li>Difficulty: {difficulty}</li>
        <li>Nonce: {nonce}</li>
        <li>Transactions: {txs}</li>
      </ul>
    </section>
"#,
        difficulty = block.difficulty,
        nonce = block.nonce,
        txs = block.transactions.len(),
    );
}

/// Renders the block list, newest first.
pub fn render_home(blocks: &[Block]) -> Html<String> {
    let mut body = String::new();
    if blocks.is_empty() {
        body.push_str("    <p>No blocks yet.</p>\n");
    }
    for block in blocks {
        render_block(&mut body, block);
    }
    page("Home", &body)
}

pub fn render_add() -> Html<String> {
    page(
        "Add",
        r#"    <form method="POST" action="/add">
      <p>Mine the pending transactions into a new block.</p>
      <button type="submit">Mine block</button>
    </form>
"#,
    )
}

async fn home(State(node): State<Arc<ApiNode>>) -> Response {
    match node.network.blockchain().blocks() {
        Ok(blocks) => render_home(&blocks).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load blocks for explorer");
            (StatusCode::INTERNAL_SERVER_ERROR, page("Error", "    <p>Failed to load blocks.</p>\n"))
                .into_response()
        }
    }
}

async fn add_form() -> Html<String> {
    render_add()
}

async fn add_submit(State(node): State<Arc<ApiNode>>) -> Response {
    match node.mine_and_broadcast().await {
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => e.into_response(),
    }
}

pub fn build_explorer_router(node: Arc<ApiNode>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/add", get(add_form).post(add_submit))
        .with_state(node)
}

pub async fn run_explorer(
    node: Arc<ApiNode>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Explorer listening on http://{}", addr);

    axum::serve(listener, build_explorer_router(node)).await?;
    Ok(())
}
