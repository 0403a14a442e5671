//! Server-rendered web UI: submission form and crawl table.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};

use crate::api::models::CrawlJobResponse;
use crate::api::server::AppState;
use crate::utils::html::escape;

/// Rows shown on the page, newest first.
const INDEX_PAGE_LIMIT: u32 = 500;

const REPLAY_VIEWER: &str = "https://replayweb.page/?source=";

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Web Archive Crawls</title>
  <style>
    body { font-family: system-ui, sans-serif; max-width: 1200px; margin: 0 auto; padding: 20px; }
    h1 { color: #333; }
    form { margin-bottom: 30px; padding: 20px; border: 1px solid #ddd; border-radius: 5px; background-color: #f9f9f9; }
    label { display: block; margin-bottom: 5px; font-weight: bold; }
    textarea, input { width: 100%; padding: 8px; margin-bottom: 15px; border: 1px solid #ccc; border-radius: 4px; box-sizing: border-box; }
    button { background-color: #0066cc; color: white; padding: 10px 15px; border: none; border-radius: 4px; cursor: pointer; }
    table { width: 100%; border-collapse: collapse; margin-top: 20px; }
    th, td { padding: 12px; text-align: left; border-bottom: 1px solid #ddd; }
    th { background-color: #f2f2f2; }
    tr:hover { background-color: #f5f5f5; }
    a { color: #0066cc; text-decoration: none; }
    a:hover { text-decoration: underline; }
    .date { white-space: nowrap; }
    .status-pending { color: #ff9900; }
    .status-working { color: #0099cc; }
    .status-completed { color: #00cc66; }
    .status-failed { color: #cc0000; }
  </style>
</head>
<body>
  <h1>Web Archive Crawls</h1>
  <p>Click on a completed archive to open it in ReplayWeb.page</p>
  <form id="crawlForm">
    <h2 style="margin-top: 0;">Start a New Crawl</h2>
    <label for="urls">URLs to crawl (one per line):</label>
    <textarea id="urls" rows="3" required placeholder="https://example.com"></textarea>
    <label for="apiToken">API Token:</label>
    <input type="password" id="apiToken" required placeholder="Enter your API token">
    <button type="submit">Start Crawl</button>
    <p id="formStatus" style="margin-top: 10px; color: #666;"></p>
  </form>
  <script>
    document.getElementById('crawlForm').addEventListener('submit', async (e) => {
      e.preventDefault();
      const statusEl = document.getElementById('formStatus');
      const apiToken = document.getElementById('apiToken').value;
      const urls = document.getElementById('urls').value
        .split('\n').map((u) => u.trim()).filter((u) => u.length > 0);
      statusEl.textContent = 'Submitting crawl job...';
      try {
        const response = await fetch('/api/crawls', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json', 'Authorization': 'Bearer ' + apiToken },
          body: JSON.stringify({ urls }),
        });
        if (response.ok) {
          const result = await response.json();
          statusEl.textContent = 'Crawl job queued! Job ID: ' + result.id;
          document.getElementById('urls').value = '';
          sessionStorage.setItem('apiToken', apiToken);
          setTimeout(() => { window.location.reload(); }, 1000);
        } else {
          statusEl.textContent = 'Error: ' + await response.text();
        }
      } catch (err) {
        statusEl.textContent = 'Error: ' + (err instanceof Error ? err.message : String(err));
      }
    });
    window.addEventListener('DOMContentLoaded', () => {
      const savedToken = sessionStorage.getItem('apiToken');
      if (savedToken) {
        document.getElementById('apiToken').value = savedToken;
      }
    });
  </script>
  <table>
    <thead>
      <tr><th>Archive ID</th><th>URLs</th><th>Status</th><th>Created At</th></tr>
    </thead>
    <tbody>
"#;

const PAGE_TAIL: &str = r#"    </tbody>
  </table>
</body>
</html>
"#;

/// Link opening `archive_url` in the replay viewer.
pub fn replay_link(archive_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(archive_url.as_bytes()).collect();
    format!("{}{}", REPLAY_VIEWER, encoded)
}

fn render_row(job: &CrawlJobResponse) -> String {
    let id = escape(&job.id);
    let id_cell = match &job.archive_url {
        Some(url) => format!(
            r#"<a href="{}" target="_blank">{}</a>"#,
            escape(&replay_link(url)),
            id
        ),
        None => id,
    };
    let status = job.status.as_str();

    format!(
        "      <tr><td>{}</td><td>{}</td><td class=\"status-{}\">{}</td><td class=\"date\">{}</td></tr>\n",
        id_cell,
        escape(&job.urls.join(", ")),
        status,
        status,
        job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Render the full page for `jobs`.
pub fn render_index(jobs: &[CrawlJobResponse]) -> String {
    let mut page = String::from(PAGE_HEAD);
    if jobs.is_empty() {
        page.push_str("      <tr><td colspan=\"4\">No archives found</td></tr>\n");
    }
    for job in jobs {
        page.push_str(&render_row(job));
    }
    page.push_str(PAGE_TAIL);
    page
}

/// `GET /`.
pub async fn index_page(State(state): State<AppState>) -> Response {
    match state
        .repository
        .list_recent_jobs(None, INDEX_PAGE_LIMIT)
        .await
    {
        Ok(jobs) => {
            let publish = state.publish.as_deref();
            let rows: Vec<CrawlJobResponse> = jobs
                .into_iter()
                .map(|job| CrawlJobResponse::from_job(job, publish))
                .collect();
            Html(render_index(&rows)).into_response()
        }
        Err(e) => {
            tracing::error!("Error loading crawls for index page: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                "Error loading archives",
            )
                .into_response()
        }
    }
}
