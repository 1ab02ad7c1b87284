use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_MODEL_ID: &str = "nickmuchi/vit-finetuned-chest-xray-pneumonia";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Model ID from Hugging Face Hub, ignored when --model-path is set
    #[arg(long, env = "MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Local path to model directory
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Use PyTorch weights instead of safetensors
    #[arg(long, env = "USE_PTH")]
    pub use_pth: bool,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Labels mapping in format "0=NORMAL,1=PNEUMONIA"
    #[arg(long, env = "ID2LABEL")]
    pub id2label: Option<String>,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn parse_id2label(&self) -> Option<HashMap<u32, String>> {
        self.id2label.as_deref().map(parse_id2label)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses `"0=NORMAL,1=PNEUMONIA"`, skipping malformed pairs.
pub fn parse_id2label(labels: &str) -> HashMap<u32, String> {
    labels
        .split(',')
        .filter_map(|pair| {
            let (id, label) = pair.split_once('=')?;
            let id = id.trim().parse().ok()?;
            Some((id, label.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label_pairs() {
        let labels = parse_id2label("0=NORMAL, 1=PNEUMONIA");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&0], "NORMAL");
        assert_eq!(labels[&1], "PNEUMONIA");
    }

    #[test]
    fn skips_malformed_pairs() {
        let labels = parse_id2label("x=NORMAL,1=PNEUMONIA,2");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[&1], "PNEUMONIA");
    }

    #[test]
    fn defaults_come_from_clap() {
        let config = Config::parse_from(["pneumoscope", "--host", "0.0.0.0", "--port", "9000"]);
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.server_address(), "0.0.0.0:9000");
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.parse_id2label().is_none());
    }
}
