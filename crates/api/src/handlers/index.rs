//! `GET /` — a fixed index page. Static-asset serving is out of scope, so
//! this is a plain embedded string rather than a templating engine.

use axum::response::Html;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>needle</title></head>
<body>
<h1>needle</h1>
<p>A/B test assignment and reporting server.</p>
<ul>
<li><code>GET /user?user-id=&lt;int&gt;&amp;user-signup-date=&lt;iso-date&gt;</code></li>
<li><code>GET /experiments</code></li>
</ul>
</body>
</html>
"#;

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
