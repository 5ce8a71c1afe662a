//! WeChat Pay (微信支付): the mail links to the statement archive, which
//! is downloaded and later opened with 7-Zip.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use super::{write_artifact, Provider};
use crate::error::{BillError, Result};
use crate::extract::{unlock, PasswordList, SevenZipBackend};
use crate::model::{ExtractOptions, Message};
use crate::parser::header::{decode_utf8_or_gb18030, percent_decode_name};

/// Upper bound for one statement download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

static DOWNLOAD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a[^>]*href="([^"]+)"[^>]*>\s*点击下载\s*</a>"#).expect("valid regex")
});

/// A completed HTTP GET.
#[derive(Debug, Clone, Default)]
pub struct Download {
    pub status: u16,
    /// Raw `Content-Disposition` value, if the server sent one.
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

/// Fetches a URL. The blocking `reqwest` client in production, a canned
/// response in tests.
pub trait Fetcher {
    fn get(&self, url: &str) -> Result<Download>;
}

/// [`Fetcher`] backed by `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Download> {
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let content_disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .map(|value| decode_utf8_or_gb18030(value.as_bytes()));
        let body = response.bytes()?.to_vec();
        Ok(Download {
            status,
            content_disposition,
            body,
        })
    }
}

pub struct Wechat {
    fetcher: Box<dyn Fetcher>,
}

impl Wechat {
    pub fn new(fetcher: Box<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Provider using the real HTTP client.
    pub fn with_http() -> Result<Self> {
        Ok(Self::new(Box::new(HttpFetcher::new()?)))
    }
}

impl Provider for Wechat {
    fn name(&self) -> &'static str {
        "wechat"
    }

    fn label(&self) -> &'static str {
        "微信支付"
    }

    fn artifact_suffix(&self) -> &'static str {
        ".zip"
    }

    fn stage(&self, message: &Message, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let html = message
            .html_body()
            .filter(|body| !body.trim().is_empty())
            .ok_or(BillError::NoHtmlBody)?;
        let url = download_link(&html).ok_or(BillError::NoDownloadLink)?;

        debug!(uid = %message.id, url = %url, "Downloading statement");
        let download = self.fetcher.get(&url)?;
        if download.status != 200 {
            return Err(BillError::Download {
                url,
                status: download.status,
            });
        }

        let name = download
            .content_disposition
            .as_deref()
            .and_then(disposition_filename)
            .unwrap_or_else(|| fallback_name(&message.id, &download.body));
        let path = write_artifact(output_dir, &self.prefix(), &name, &download.body)?;
        Ok(vec![path])
    }

    /// The 7-Zip tool is resolved before the password file is read, so a
    /// missing tool means no attempt is made.
    fn unpack(&self, artifact: &Path, extract_dir: &Path, options: &ExtractOptions) -> Result<Vec<PathBuf>> {
        let backend = SevenZipBackend::locate(options)?;
        let passwords = PasswordList::from_options(options)?;
        let unlocked = unlock(&backend, artifact, &passwords, extract_dir, &self.prefix())?;
        Ok(unlocked.files)
    }
}

/// The `href` of the first anchor labelled `点击下载`.
pub fn download_link(html: &str) -> Option<String> {
    DOWNLOAD_LINK
        .captures(html)
        .map(|caps| caps[1].trim().replace("&amp;", "&"))
}

/// Filename from a `Content-Disposition` value.
///
/// `filename*=` (RFC 5987) wins over `filename=`; both are percent-decoded.
pub fn disposition_filename(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(header) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        let value = value.as_str();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'language'value
                let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
                extended = Some(percent_decode_name(encoded));
            }
            "filename" => plain = Some(percent_decode_name(value)),
            _ => {}
        }
    }

    extended
        .or(plain)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Split header parameters on `;`, ignoring separators inside quoted strings.
fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&header[start..]);
    params
}

/// Strip surrounding quotes and undo `\"`-style escapes.
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"') else {
        return value.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Name used when the server does not suggest one.
fn fallback_name(id: &str, body: &[u8]) -> String {
    if body.starts_with(b"PK\x03\x04") {
        format!("{id}.zip")
    } else {
        format!("{id}.dat")
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::model::BodyPart;

    struct Canned {
        response: Download,
        requested: RefCell<Vec<String>>,
    }

    impl Canned {
        fn new(status: u16, disposition: Option<&str>, body: &[u8]) -> Self {
            Self {
                response: Download {
                    status,
                    content_disposition: disposition.map(str::to_string),
                    body: body.to_vec(),
                },
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl Fetcher for Rc<Canned> {
        fn get(&self, url: &str) -> Result<Download> {
            self.requested.borrow_mut().push(url.to_string());
            Ok(self.response.clone())
        }
    }

    fn canned(status: u16, disposition: Option<&str>, body: &[u8]) -> Rc<Canned> {
        Rc::new(Canned::new(status, disposition, body))
    }

    fn notice(html: &str) -> Message {
        Message::new("314", "微信支付账单", "微信支付 <wechatpay@tencent.com>")
            .with_part(BodyPart::new("text/html", Some("utf-8"), html.as_bytes().to_vec()))
    }

    const NOTICE: &str = r#"<p>您的账单已生成</p>
<A class="btn" HREF="https://x/y.zip?a=1&amp;b=2" target="_blank">
    点击下载
</A>"#;

    #[test]
    fn test_download_link() {
        assert_eq!(download_link(NOTICE).as_deref(), Some("https://x/y.zip?a=1&b=2"));
        assert_eq!(download_link(r#"<a href="https://x">查看详情</a>"#), None);
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename(r#"attachment; filename="bill.zip""#).as_deref(),
            Some("bill.zip")
        );
        assert_eq!(
            disposition_filename("attachment; filename=%E5%BE%AE%E4%BF%A1.zip").as_deref(),
            Some("微信.zip")
        );
        assert_eq!(
            disposition_filename(
                "attachment; filename=\"fallback.zip\"; filename*=UTF-8''%E8%B4%A6%E5%8D%95.zip"
            )
            .as_deref(),
            Some("账单.zip")
        );
        assert_eq!(
            disposition_filename(r#"attachment; filename="bill;2024.zip""#).as_deref(),
            Some("bill;2024.zip")
        );
        assert_eq!(
            disposition_filename(r#"attachment; filename="say \"hi\"; now.zip"; size=10"#).as_deref(),
            Some("say \"hi\"; now.zip")
        );
        assert_eq!(disposition_filename("inline"), None);
        assert_eq!(disposition_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(fallback_name("7", b"PK\x03\x04rest"), "7.zip");
        assert_eq!(fallback_name("7", b"<html>"), "7.dat");
    }

    #[test]
    fn test_stage_downloads_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = canned(200, Some(r#"attachment; filename="bill.zip""#), b"PK\x03\x04data");
        let wechat = Wechat::new(Box::new(Rc::clone(&fetcher)));

        let paths = wechat.stage(&notice(NOTICE), dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("wechat_bill.zip")]);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"PK\x03\x04data");
        assert_eq!(*fetcher.requested.borrow(), vec!["https://x/y.zip?a=1&b=2"]);
    }

    #[test]
    fn test_stage_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        let wechat = Wechat::new(Box::new(canned(200, None, b"PK\x03\x04")));
        let paths = wechat.stage(&notice(NOTICE), dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("wechat_314.zip")]);
    }

    #[test]
    fn test_stage_http_error() {
        let dir = tempfile::tempdir().unwrap();
        let wechat = Wechat::new(Box::new(canned(404, None, b"")));
        let err = wechat.stage(&notice(NOTICE), dir.path()).unwrap_err();
        assert!(matches!(err, BillError::Download { status: 404, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stage_without_link() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = canned(200, None, b"");
        let wechat = Wechat::new(Box::new(Rc::clone(&fetcher)));
        let err = wechat.stage(&notice("<p>no link</p>"), dir.path()).unwrap_err();
        assert!(matches!(err, BillError::NoDownloadLink));
        assert!(fetcher.requested.borrow().is_empty());
    }

    #[test]
    fn test_unpack_without_tool_makes_no_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("wechat_bill.zip");
        std::fs::write(&artifact, b"PK").unwrap();
        let wechat = Wechat::new(Box::new(canned(200, None, b"")));
        let options = ExtractOptions::default()
            .with("sevenzip_bin", "/nonexistent/7z")
            .with("password_file", "/nonexistent/passwords.txt");
        let err = wechat.unpack(&artifact, dir.path(), &options).unwrap_err();
        assert!(matches!(err, BillError::ToolNotFound(_)));
    }
}
