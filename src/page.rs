//! Server-rendered HTML for the single upload page

use std::fmt::Write;

use crate::report::{Outcome, Report};

const STYLE: &str = r#"
body {
    margin: 0;
    min-height: 100vh;
    font-family: system-ui, -apple-system, "Segoe UI", sans-serif;
    color: #e5e7eb;
    background: linear-gradient(135deg, #0a0a1a 0%, #1a1a3a 50%, #0f0f2f 100%);
}
main { max-width: 760px; margin: 0 auto; padding: 1rem 1.5rem 3rem; }
.main-header { text-align: center; padding: 2rem 0 0.5rem; color: #00d4ff; font-size: 3rem; font-weight: 800; margin: 0; }
.sub-header { text-align: center; color: #a0a0c0; font-size: 1.2rem; margin-bottom: 2rem; }
.upload-card {
    background: rgba(255, 255, 255, 0.05);
    backdrop-filter: blur(10px);
    border-radius: 20px;
    padding: 2rem;
    border: 1px solid rgba(255, 255, 255, 0.1);
    box-shadow: 0 8px 32px rgba(0, 0, 0, 0.3);
    margin: 1rem 0;
}
.upload-card small { display: block; color: #9ca3af; margin-top: 0.5rem; }
.columns { display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; margin-top: 1.5rem; }
.columns img { width: 100%; border-radius: 10px; }
.result-normal, .result-pneumonia { border-radius: 15px; padding: 1.5rem; text-align: center; }
.result-normal h2, .result-pneumonia h2 { margin: 0; }
.result-normal p, .result-pneumonia p { margin-top: 0.5rem; }
.result-normal {
    background: linear-gradient(135deg, rgba(16, 185, 129, 0.2), rgba(6, 95, 70, 0.3));
    border: 2px solid #10b981;
    animation: pulse-green 2s infinite;
}
.result-normal h2 { color: #10b981; }
.result-normal p { color: #6ee7b7; }
.result-pneumonia {
    background: linear-gradient(135deg, rgba(239, 68, 68, 0.2), rgba(127, 29, 29, 0.3));
    border: 2px solid #ef4444;
    animation: pulse-red 2s infinite;
}
.result-pneumonia h2 { color: #ef4444; }
.result-pneumonia p { color: #fca5a5; }
@keyframes pulse-green {
    0%, 100% { box-shadow: 0 0 20px rgba(16, 185, 129, 0.4); }
    50% { box-shadow: 0 0 40px rgba(16, 185, 129, 0.6); }
}
@keyframes pulse-red {
    0%, 100% { box-shadow: 0 0 20px rgba(239, 68, 68, 0.4); }
    50% { box-shadow: 0 0 40px rgba(239, 68, 68, 0.6); }
}
.confidence-container { background: rgba(255, 255, 255, 0.1); border-radius: 10px; padding: 1rem; margin-top: 1rem; }
progress { width: 100%; height: 0.75rem; margin-top: 0.75rem; accent-color: #00d4ff; }
details { margin-top: 1rem; background: rgba(255, 255, 255, 0.05); border-radius: 10px; padding: 0.75rem 1rem; }
.info-box { background: rgba(59, 130, 246, 0.1); border-left: 4px solid #3b82f6; padding: 1rem; border-radius: 0 10px 10px 0; margin: 1rem 0; }
.status-success { background: rgba(16, 185, 129, 0.15); color: #6ee7b7; border-radius: 10px; padding: 0.75rem 1rem; }
.status-error { background: rgba(239, 68, 68, 0.15); color: #fca5a5; border-radius: 10px; padding: 0.75rem 1rem; margin-top: 1rem; }
.status-warning { background: rgba(251, 191, 36, 0.15); color: #fbbf24; border-radius: 10px; padding: 0.75rem 1rem; margin-top: 1rem; }
.status-info { background: rgba(59, 130, 246, 0.15); color: #93c5fd; border-radius: 10px; padding: 0.75rem 1rem; margin-top: 0.5rem; }
.disclaimer {
    background: rgba(251, 191, 36, 0.1);
    border: 1px solid rgba(251, 191, 36, 0.3);
    border-radius: 10px;
    padding: 1rem;
    margin-top: 2rem;
    color: #fbbf24;
    font-size: 0.9rem;
}
footer { text-align: center; color: #6b7280; border-top: 1px solid rgba(255, 255, 255, 0.1); margin-top: 2rem; padding-top: 1rem; }
@media (max-width: 640px) { .columns { grid-template-columns: 1fr; } }
"#;

/// State of the cached classification pipeline as the page reports it
#[derive(Debug, Clone, Copy)]
pub enum ModelStatus<'a> {
    Ready { model: &'a str },
    Failed { error: &'a str },
}

#[derive(Debug, Clone)]
pub enum AnalysisResult {
    Report(Report),
    /// The pipeline returned an empty ranking
    NoResults,
    /// The upload was rejected before reaching the pipeline
    InvalidUpload(String),
    Error(String),
}

/// What happened to one upload
#[derive(Debug, Clone)]
pub struct Analysis {
    /// The RGB upload as a `data:` URL, absent when decoding failed
    pub image_url: Option<String>,
    pub result: AnalysisResult,
}

#[derive(Debug, Clone)]
pub struct PageView<'a> {
    pub model: ModelStatus<'a>,
    pub analysis: Option<Analysis>,
}

pub fn escape_html(text: &str) -> String {
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

pub fn render_page(view: &PageView<'_>) -> String {
    let mut html = String::with_capacity(16 * 1024);

    html.push_str(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>Pneumonia Detection AI</title>\n\
         <link rel=\"icon\" href=\"data:image/svg+xml,<svg xmlns=%22http://www.w3.org/2000/svg%22 viewBox=%220 0 100 100%22><text y=%22.9em%22 font-size=%2290%22>🫁</text></svg>\">\n<style>",
    );
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n<body>\n<main>\n");

    html.push_str(
        r#"<h1 class="main-header">🫁 Pneumonia Detection AI</h1>
<p class="sub-header">Upload a chest X-ray image for AI-powered pneumonia detection</p>
<div class="info-box">
    <strong>📋 How it works:</strong><br>
    1. Upload a chest X-ray image (PNG, JPG, JPEG)<br>
    2. Our AI model analyzes the image<br>
    3. Get instant results with confidence score
</div>
"#,
    );

    render_model_status(&mut html, view.model);
    render_upload_form(&mut html, matches!(view.model, ModelStatus::Ready { .. }));

    if let Some(analysis) = &view.analysis {
        render_analysis(&mut html, analysis);
    }

    html.push_str(
        r#"<div class="disclaimer">
    <strong>⚠️ Medical Disclaimer:</strong><br>
    This AI tool is for educational and research purposes only. It should NOT be used as a substitute
    for professional medical diagnosis. Always consult a qualified healthcare provider for medical advice.
</div>
<footer>Powered by Hugging Face 🤗 models | Served with Rust 🦀</footer>
</main>
</body>
</html>
"#,
    );

    html
}

fn render_model_status(html: &mut String, status: ModelStatus<'_>) {
    match status {
        ModelStatus::Ready { model } => {
            let _ = writeln!(
                html,
                r#"<div class="status-success">✅ Model loaded successfully! <small>({})</small></div>"#,
                escape_html(model)
            );
        }
        ModelStatus::Failed { error } => {
            let _ = writeln!(
                html,
                r#"<div class="status-error">Failed to load model: {}</div>
<div class="status-info">Check the model settings (<code>--model-id</code>, <code>--model-path</code>) and network access to the Hugging Face Hub, then restart the server.</div>"#,
                escape_html(error)
            );
        }
    }
}

fn render_upload_form(html: &mut String, enabled: bool) {
    let disabled = if enabled { "" } else { " disabled" };
    let _ = writeln!(
        html,
        r#"<div class="upload-card">
<form action="/predict" method="post" enctype="multipart/form-data">
    <label for="file"><strong>Choose a chest X-ray image</strong></label><br>
    <input type="file" id="file" name="file" accept=".png,.jpg,.jpeg,image/png,image/jpeg" required{disabled}>
    <button type="submit"{disabled}>Analyze</button>
    <small>Upload a clear chest X-ray image for best results</small>
</form>
</div>"#
    );
}

fn render_analysis(html: &mut String, analysis: &Analysis) {
    html.push_str("<section class=\"columns\">\n");

    html.push_str("<div>\n<h3>📸 Uploaded X-Ray</h3>\n");
    if let Some(url) = &analysis.image_url {
        let _ = writeln!(html, r#"<img src="{url}" alt="Uploaded chest X-ray">"#);
    }
    html.push_str("</div>\n");

    html.push_str("<div>\n<h3>🔬 Analysis Result</h3>\n");
    match &analysis.result {
        AnalysisResult::Report(report) => render_report(html, report),
        AnalysisResult::NoResults => {
            html.push_str(
                "<div class=\"status-warning\">Could not get prediction results.</div>\n",
            );
        }
        AnalysisResult::InvalidUpload(message) => {
            let _ = writeln!(
                html,
                r#"<div class="status-error">Could not read the uploaded image: {}</div>"#,
                escape_html(message)
            );
        }
        AnalysisResult::Error(message) => {
            let _ = writeln!(
                html,
                r#"<div class="status-error">Error during prediction: {}</div>"#,
                escape_html(message)
            );
        }
    }
    html.push_str("</div>\n</section>\n");
}

fn render_report(html: &mut String, report: &Report) {
    match report.outcome {
        Outcome::Pneumonia => html.push_str(
            r#"<div class="result-pneumonia">
    <h2>⚠️ PNEUMONIA DETECTED</h2>
    <p>Signs of pneumonia found in the X-ray</p>
</div>
"#,
        ),
        Outcome::Normal => html.push_str(
            r#"<div class="result-normal">
    <h2>✅ NORMAL</h2>
    <p>No signs of pneumonia detected</p>
</div>
"#,
        ),
    }

    let _ = writeln!(
        html,
        r#"<div class="confidence-container">
    <strong>Confidence Score:</strong> {}
</div>
<progress value="{:.4}" max="1">{}</progress>"#,
        report.confidence, report.progress, report.confidence
    );

    if let Some(details) = &report.details {
        html.push_str("<details>\n<summary>📊 Detailed Results</summary>\n<ul>\n");
        for row in details {
            let _ = writeln!(
                html,
                "<li><strong>{}</strong>: {}</li>",
                escape_html(&row.label),
                row.score
            );
        }
        html.push_str("</ul>\n</details>\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prediction;

    fn ready() -> ModelStatus<'static> {
        ModelStatus::Ready { model: "test/vit" }
    }

    fn analysis(result: AnalysisResult) -> Option<Analysis> {
        Some(Analysis {
            image_url: Some("data:image/png;base64,AAAA".to_string()),
            result,
        })
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b a="1">'&'</b>"#),
            "&lt;b a=&quot;1&quot;&gt;&#39;&amp;&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn landing_page_has_enabled_upload_form() {
        let html = render_page(&PageView {
            model: ready(),
            analysis: None,
        });
        assert!(html.contains("Model loaded successfully"));
        assert!(html.contains(r#"name="file""#));
        assert!(!html.contains(" disabled"));
        assert!(!html.contains("Analysis Result"));
        assert!(html.contains("Medical Disclaimer"));
    }

    #[test]
    fn failed_model_disables_upload() {
        let html = render_page(&PageView {
            model: ModelStatus::Failed {
                error: "repo <missing>",
            },
            analysis: None,
        });
        assert!(html.contains("Failed to load model: repo &lt;missing&gt;"));
        assert!(html.contains("required disabled"));
        assert!(html.contains(r#"<button type="submit" disabled>"#));
    }

    #[test]
    fn pneumonia_report_renders_red_block_and_breakdown() {
        let report = Report::from_predictions(&[
            Prediction::new("PNEUMONIA", 0.9731),
            Prediction::new("NORMAL", 0.0269),
        ])
        .unwrap();
        let html = render_page(&PageView {
            model: ready(),
            analysis: analysis(AnalysisResult::Report(report)),
        });

        assert!(html.contains(r#"<div class="result-pneumonia">"#));
        assert!(!html.contains(r#"<div class="result-normal">"#));
        assert!(html.contains("<strong>Confidence Score:</strong> 97.3%"));
        assert!(html.contains("Detailed Results"));
        assert!(html.contains("<li><strong>PNEUMONIA</strong>: 97.31%</li>"));
        assert!(html.contains("<li><strong>NORMAL</strong>: 2.69%</li>"));
        assert!(html.contains(r#"<img src="data:image/png;base64,AAAA""#));
    }

    #[test]
    fn normal_report_without_breakdown() {
        let report = Report::from_predictions(&[Prediction::new("NORMAL", 0.6)]).unwrap();
        let html = render_page(&PageView {
            model: ready(),
            analysis: analysis(AnalysisResult::Report(report)),
        });

        assert!(html.contains(r#"<div class="result-normal">"#));
        assert!(html.contains("60.0%"));
        assert!(!html.contains("Detailed Results"));
    }

    #[test]
    fn prediction_error_shows_message_and_no_result() {
        let html = render_page(&PageView {
            model: ready(),
            analysis: analysis(AnalysisResult::Error("tensor shape mismatch".to_string())),
        });

        assert!(html.contains("Error during prediction: tensor shape mismatch"));
        assert!(!html.contains("Confidence Score"));
        assert!(!html.contains(r#"<div class="result-"#));
    }

    #[test]
    fn rejected_upload_is_not_reported_as_a_prediction() {
        let html = render_page(&PageView {
            model: ready(),
            analysis: Some(Analysis {
                image_url: None,
                result: AnalysisResult::InvalidUpload("Image data is empty".to_string()),
            }),
        });

        assert!(html.contains("Could not read the uploaded image: Image data is empty"));
        assert!(!html.contains("Error during prediction"));
        assert!(!html.contains("<img src="));
    }

    #[test]
    fn empty_ranking_shows_warning() {
        let html = render_page(&PageView {
            model: ready(),
            analysis: analysis(AnalysisResult::NoResults),
        });
        assert!(html.contains("Could not get prediction results."));
    }
}
