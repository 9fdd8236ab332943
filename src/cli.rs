use clap::Parser;

use crate::downloader::{
    default_concurrency, DownloadRequest, DEFAULT_MAX_RETRIES, DEFAULT_PART_SIZE,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "s3proxy-dl")]
#[command(about = "Stream an object from S3 or an HTTP origin to stdout with parallel ranged GETs", long_about = None)]
pub struct Args {
    /// Object to fetch: s3://bucket/key or http(s)://host/path
    pub uri: String,

    /// HTTP Range header value (e.g. "bytes=100-199"); disables chunking
    #[arg(short = 'r', long)]
    pub range: Option<String>,

    /// Custom S3 endpoint (uses path-style addressing)
    #[arg(long, env = "AWS_API_ENDPOINT")]
    pub endpoint_url: Option<String>,

    /// Prefix prepended to the S3 key
    #[arg(long, env = "AWS_S3_KEY_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(flatten)]
    pub download: DownloadArgs,
}

#[derive(clap::Args, Debug, Clone, bon::Builder)]
pub struct DownloadArgs {
    /// Number of concurrent download workers (defaults to the CPU count)
    #[arg(short = 'c', long, env = "S3PROXY_CONCURRENCY", default_value_t = default_concurrency())]
    #[builder(default = default_concurrency())]
    pub concurrency: usize,

    /// Part size (supports human-readable sizes: 8MB, 16MiB, 1GB, etc.)
    #[arg(long, env = "S3PROXY_PART_SIZE", default_value = "50MiB", value_parser = parse_size)]
    #[builder(default = DEFAULT_PART_SIZE)]
    pub part_size: u64,

    /// Retries per chunk after an interrupted body
    #[arg(long, env = "S3PROXY_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: usize,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    #[builder(default)]
    pub quiet: bool,
}

impl DownloadArgs {
    pub fn request(&self, key: impl Into<String>, range: Option<String>) -> DownloadRequest {
        DownloadRequest::builder()
            .key(key)
            .maybe_range(range)
            .part_size(self.part_size)
            .concurrency(self.concurrency)
            .max_retries(self.max_retries)
            .build()
    }
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();

    if let Ok(num) = s.parse::<u64>() {
        if num == 0 {
            return Err("Size must be greater than zero".to_string());
        }
        return Ok(num);
    }

    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| s.split_at(i))
        .ok_or_else(|| format!("Invalid size format: {}", s))?;

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    let multiplier: u64 = match suffix.trim() {
        "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        _ => return Err(format!("Unknown size suffix: {}", suffix)),
    };

    let size = (num * multiplier as f64) as u64;
    if size == 0 {
        return Err("Size must be greater than zero".to_string());
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("8MB").unwrap(), 8_000_000);
        assert_eq!(parse_size("50MiB").unwrap(), 52_428_800);
        assert_eq!(parse_size("1.5 KiB").unwrap(), 1_536);
        assert_eq!(parse_size("1GiB").unwrap(), 1_073_741_824);
        assert!(parse_size("0").is_err());
        assert!(parse_size("0.1B").is_err());
        assert!(parse_size("12XB").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "s3proxy-dl",
            "s3://bucket/key.bin",
            "-c",
            "4",
            "--part-size",
            "8MiB",
            "--range",
            "bytes=0-99",
            "-q",
        ])
        .unwrap();

        assert_eq!(args.download.concurrency, 4);
        assert_eq!(args.download.part_size, 8 * 1024 * 1024);
        assert!(args.download.quiet);

        let request = args.download.request("key.bin", args.range.clone());
        assert_eq!(request.range.as_deref(), Some("bytes=0-99"));
        assert_eq!(request.part_size, 8 * 1024 * 1024);
        assert_eq!(request.concurrency, 4);
    }

    #[test]
    fn test_download_args_builder_defaults() {
        let args = DownloadArgs::builder().quiet(true).build();
        assert_eq!(args.part_size, DEFAULT_PART_SIZE);
        assert_eq!(args.max_retries, DEFAULT_MAX_RETRIES);
        assert!(args.concurrency >= 1);
    }
}
