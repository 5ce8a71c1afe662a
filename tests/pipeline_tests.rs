//! End-to-end runs over an in-memory mailbox: dispatch, staging, flagging
//! and the extraction pass that follows.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use billfetch::error::Result;
use billfetch::mailbox::{FlagChange, MailStore, MemoryStore};
use billfetch::parser::mime::parse_message;
use billfetch::pipeline::{Disposition, ParseStats, Pipeline, RunMode};
use billfetch::provider::wechat::Download;
use billfetch::provider::Fetcher;
use billfetch::registry::Registry;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

/// Serves one canned response and remembers every URL asked for. Clones
/// share the request log.
#[derive(Clone)]
struct Canned {
    response: Download,
    requested: Rc<RefCell<Vec<String>>>,
}

impl Fetcher for Canned {
    fn get(&self, url: &str) -> Result<Download> {
        self.requested.borrow_mut().push(url.to_string());
        Ok(self.response.clone())
    }
}

fn canned(status: u16, disposition: Option<&str>, body: &[u8]) -> Canned {
    Canned {
        response: Download {
            status,
            content_disposition: disposition.map(str::to_string),
            body: body.to_vec(),
        },
        requested: Rc::new(RefCell::new(Vec::new())),
    }
}

fn pipeline(root: &TempDir, fetcher: &Canned) -> Pipeline {
    Pipeline::new(
        Registry::with_fetcher(Box::new(fetcher.clone())),
        root.path().join("output"),
        root.path().join("extract"),
    )
}

fn staged(pipeline: &Pipeline) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(pipeline.output_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ─── Fixtures parse the way providers expect ────────────────────────

#[test]
fn test_fixture_headers_decode() {
    let alipay = parse_message("1", &fixture("alipay.eml")).unwrap();
    assert_eq!(alipay.subject, "支付宝交易流水明细");
    assert_eq!(alipay.sender, "支付宝 <service@mail.alipay.com>");
    assert_eq!(alipay.attachments.len(), 1);
    assert_eq!(
        alipay.attachments[0].filename,
        "支付宝交易流水明细(20240101-20240131).zip"
    );

    let wechat = parse_message("2", &fixture("wechat.eml")).unwrap();
    assert_eq!(wechat.subject, "微信支付-账单流水文件");
    assert!(wechat.html_body().unwrap().contains("点击下载"));
}

// ─── Dispatch ───────────────────────────────────────────────────────

#[test]
fn test_each_fixture_reaches_its_provider() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, Some(r#"attachment; filename="bill.zip""#), b"PK\x03\x04");
    let pipeline = pipeline(&root, &fetcher);

    let mut store = MemoryStore::new();
    store.insert(11, fixture("alipay.eml"));
    store.insert(12, fixture("cmbcc.eml"));
    store.insert(13, fixture("wechat.eml"));
    store.insert(14, fixture("newsletter.eml"));

    assert_eq!(
        pipeline.dispatch(&mut store, 11),
        Disposition::Parsed { provider: "alipay" }
    );
    assert_eq!(
        pipeline.dispatch(&mut store, 12),
        Disposition::Parsed { provider: "cmbcc" }
    );
    assert_eq!(
        pipeline.dispatch(&mut store, 13),
        Disposition::Parsed { provider: "wechat" }
    );
    assert_eq!(pipeline.dispatch(&mut store, 14), Disposition::Unmatched);

    assert_eq!(
        staged(&pipeline),
        vec![
            "alipay_支付宝交易流水明细(20240101-20240131).zip".to_string(),
            "cmbcc_12.html".to_string(),
            "wechat_bill.zip".to_string(),
        ]
    );
    assert_eq!(
        *fetcher.requested.borrow(),
        vec!["https://download.example.com/bill?id=123&token=abc".to_string()]
    );
    assert_eq!(store.is_seen(11), Some(true));
    assert_eq!(store.is_seen(14), Some(false));
}

#[test]
fn test_wechat_reminder_is_saved_under_suggested_name() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, Some(r#"attachment; filename="bill.zip""#), b"PK\x03\x04data");
    let pipeline = pipeline(&root, &fetcher);

    let raw = "From: wechatpay@tencent.com\r\n\
Subject: 微信支付提醒\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p><a href=\"https://x/y.zip\">点击下载</a></p>\r\n";
    let mut store = MemoryStore::new();
    store.insert(5, raw.as_bytes());

    let stats = pipeline.parse_phase(&mut store, &[], &|_, _| {}).unwrap();
    assert_eq!(stats.parsed, 1);
    assert_eq!(*fetcher.requested.borrow(), vec!["https://x/y.zip".to_string()]);

    root.child("output")
        .child("wechat_bill.zip")
        .assert(predicate::path::is_file());
    assert_eq!(store.changes(), &[FlagChange::Read(5)]);
}

#[test]
fn test_unmatched_message_is_left_unread_and_batch_continues() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher);

    let mut store = MemoryStore::new();
    store.insert(1, fixture("newsletter.eml"));
    store.insert(2, fixture("cmbcc.eml"));

    let stats = pipeline.parse_phase(&mut store, &[], &|_, _| {}).unwrap();
    assert_eq!(
        stats,
        ParseStats {
            messages: 2,
            parsed: 1,
            unmatched: 1,
            failed: 0
        }
    );
    assert_eq!(
        store.changes(),
        &[FlagChange::Unread(1), FlagChange::Read(2)]
    );
    assert!(fetcher.requested.borrow().is_empty());
}

#[test]
fn test_failed_download_leaves_message_unread() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(404, None, b"not found");
    let pipeline = pipeline(&root, &fetcher);

    let mut store = MemoryStore::new();
    store.insert(3, fixture("wechat.eml"));

    assert_eq!(
        pipeline.dispatch(&mut store, 3),
        Disposition::ParseFailed { provider: "wechat" }
    );
    assert_eq!(store.is_seen(3), Some(false));
    assert!(staged(&pipeline).is_empty());
}

#[test]
fn test_sender_filter_limits_search() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher);

    let mut store = MemoryStore::new();
    store.insert(1, fixture("newsletter.eml"));
    store.insert(2, fixture("cmbcc.eml"));
    store.insert_seen(3, fixture("cmbcc.eml"));

    let senders = vec!["ccsvc@message.cmbchina.com".to_string()];
    let stats = pipeline.parse_phase(&mut store, &senders, &|_, _| {}).unwrap();
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.parsed, 1);
    assert_eq!(store.changes(), &[FlagChange::Read(2)]);
}

// ─── Full runs ──────────────────────────────────────────────────────

fn take_store(store: MemoryStore) -> impl FnOnce() -> Result<MemoryStore> {
    move || Ok(store)
}

#[test]
fn test_full_run_turns_statement_mail_into_csv() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher);

    let mut store = MemoryStore::new();
    store.insert(21, fixture("cmbcc.eml"));
    store.insert(22, fixture("newsletter.eml"));

    let summary = pipeline
        .run(RunMode::Full, &[], take_store(store), &|_, _| {})
        .unwrap();

    let parse = summary.parse.unwrap();
    assert_eq!((parse.parsed, parse.unmatched), (1, 1));
    let extract = summary.extract.unwrap();
    assert_eq!((extract.extracted, extract.deleted), (1, 1));

    let csv = root.child("extract").child("cmbcc_2024_05.csv");
    csv.assert(predicate::path::is_file());
    csv.assert(predicate::str::starts_with(
        "交易日,记账日,交易摘要,人民币金额,卡号末四位,交易地金额,交易地\r\n",
    ));
    csv.assert(predicate::str::contains("05/02,05/03,星巴克(南京西路店),38.00,1234,38.00,CN\r\n"));
    csv.assert(predicate::str::contains("05/10,05/11,财付通-滴滴出行,25.50,1234,25.50,CN\r\n"));
    csv.assert(predicate::str::contains("\"APPLE.COM/BILL, ITUNES\""));
    csv.assert(predicate::str::contains("本期应还").not());

    root.child("output")
        .child("cmbcc_21.html")
        .assert(predicate::path::missing());
}

#[test]
fn test_keep_preserves_staged_artifacts() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher).keep(true);

    let mut store = MemoryStore::new();
    store.insert(21, fixture("cmbcc.eml"));

    let summary = pipeline
        .run(RunMode::Full, &[], take_store(store), &|_, _| {})
        .unwrap();
    let extract = summary.extract.unwrap();
    assert_eq!((extract.extracted, extract.deleted), (1, 0));

    let html = parse_message("21", &fixture("cmbcc.eml"))
        .unwrap()
        .html_body()
        .unwrap();
    let staged = root.child("output").child("cmbcc_21.html");
    staged.assert(predicate::path::is_file());
    assert_eq!(std::fs::read(staged.path()).unwrap(), html.as_bytes());
}

#[test]
fn test_parse_only_stages_without_extracting() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher);

    let mut store = MemoryStore::new();
    store.insert(8, fixture("cmbcc.eml"));

    let summary = pipeline
        .run(RunMode::ParseOnly, &[], take_store(store), &|_, _| {})
        .unwrap();
    assert!(summary.extract.is_none());
    root.child("output")
        .child("cmbcc_8.html")
        .assert(predicate::path::is_file());
    root.child("extract")
        .child("cmbcc_2024_05.csv")
        .assert(predicate::path::missing());
}

#[test]
fn test_extract_only_picks_up_earlier_artifacts() {
    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher);

    let html = parse_message("9", &fixture("cmbcc.eml"))
        .unwrap()
        .html_body()
        .unwrap();
    root.child("output").create_dir_all().unwrap();
    root.child("output").child("cmbcc_9.html").write_str(&html).unwrap();
    root.child("output").child("notes.txt").write_str("unrelated").unwrap();

    let summary = pipeline
        .run::<MemoryStore, _>(
            RunMode::ExtractOnly,
            &[],
            || panic!("extract-only must not connect"),
            &|_, _| {},
        )
        .unwrap();
    let extract = summary.extract.unwrap();
    assert_eq!((extract.extracted, extract.skipped), (1, 1));
    root.child("output")
        .child("notes.txt")
        .assert(predicate::path::is_file());
}

#[test]
fn test_session_is_closed_after_parse_phase() {
    struct Closing<'a> {
        inner: MemoryStore,
        closed: &'a RefCell<bool>,
    }

    impl MailStore for Closing<'_> {
        fn search_unseen(&mut self, senders: &[String]) -> Result<Vec<u32>> {
            self.inner.search_unseen(senders)
        }
        fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
            self.inner.fetch(uid)
        }
        fn mark_read(&mut self, uid: u32) -> Result<()> {
            self.inner.mark_read(uid)
        }
        fn mark_unread(&mut self, uid: u32) -> Result<()> {
            self.inner.mark_unread(uid)
        }
        fn close(&mut self) -> Result<()> {
            *self.closed.borrow_mut() = true;
            self.inner.close()
        }
    }

    let root = TempDir::new().unwrap();
    let fetcher = canned(200, None, b"");
    let pipeline = pipeline(&root, &fetcher);
    let closed = RefCell::new(false);

    let mut inner = MemoryStore::new();
    inner.insert(1, fixture("newsletter.eml"));
    pipeline
        .run(
            RunMode::ParseOnly,
            &[],
            || {
                Ok(Closing {
                    inner,
                    closed: &closed,
                })
            },
            &|_, _| {},
        )
        .unwrap();
    assert!(*closed.borrow());
}
