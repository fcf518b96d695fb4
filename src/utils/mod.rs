use url::Url;

use crate::domain::DownloadError;

/// Parse a source address, accepting only absolute http(s) URLs
pub fn parse_download_url(url: &str) -> Result<Url, DownloadError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidArgument("URL is empty".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| DownloadError::InvalidArgument(format!("Malformed URL {:?}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(DownloadError::InvalidArgument(format!(
            "URL {:?} has no host",
            url
        ))),
        scheme => Err(DownloadError::InvalidArgument(format!(
            "Unsupported URL scheme {:?}",
            scheme
        ))),
    }
}

/// Reject names that are not a single plain file name
pub fn validate_filename(filename: &str) -> Result<(), DownloadError> {
    if filename.trim().is_empty() {
        return Err(DownloadError::InvalidArgument(
            "Filename is empty".to_string(),
        ));
    }
    if filename == "." || filename == ".." {
        return Err(DownloadError::InvalidArgument(format!(
            "Filename {:?} is not a file name",
            filename
        )));
    }
    if filename.contains(['/', '\\', '\0']) {
        return Err(DownloadError::InvalidArgument(format!(
            "Filename {:?} must not contain path separators",
            filename
        )));
    }
    Ok(())
}

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\0' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Derive a destination name from the last non-empty path segment
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()?;
    let name = sanitize_filename(segment);
    validate_filename(&name).ok().map(|_| name)
}

/// Human-readable byte count, e.g. `1.5 MiB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_url() {
        assert!(parse_download_url("https://example.com/a.zip").is_ok());
        assert!(parse_download_url(" http://example.com/b.zip ").is_ok());
        assert!(matches!(
            parse_download_url(""),
            Err(DownloadError::InvalidArgument(_))
        ));
        assert!(parse_download_url("not a url").is_err());
        assert!(parse_download_url("ftp://example.com/a.zip").is_err());
        assert!(parse_download_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("a.zip").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("   ").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../a.zip").is_err());
        assert!(validate_filename("dir\\a.zip").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test/file.mp3"), "test_file.mp3");
        assert_eq!(sanitize_filename("normal-name.mp3"), "normal-name.mp3");
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://example.com/files/archive.tar.gz?x=1").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("archive.tar.gz"));

        let url = Url::parse("https://example.com/files/").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("files"));

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
