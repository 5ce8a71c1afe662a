use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use billfetch::error::{BillError, Result};
use billfetch::parser::mime::parse_message;
use billfetch::provider::cmbcc::statement_rows;
use billfetch::provider::wechat::Download;
use billfetch::provider::Fetcher;
use billfetch::registry::Registry;

struct Offline;

impl Fetcher for Offline {
    fn get(&self, url: &str) -> Result<Download> {
        Err(BillError::Download {
            url: url.to_string(),
            status: 503,
        })
    }
}

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_parse_message(c: &mut Criterion) {
    let raw = fixture("alipay.eml");

    c.bench_function("parse_alipay_message", |b| {
        b.iter(|| parse_message("1", &raw).unwrap())
    });
}

fn bench_find_provider(c: &mut Criterion) {
    let registry = Registry::with_fetcher(Box::new(Offline));
    let subjects = [
        ("支付宝交易流水明细", "service@mail.alipay.com"),
        ("招商银行信用卡电子账单", "ccsvc@message.cmbchina.com"),
        ("微信支付-账单流水文件", "wechatpay@tencent.com"),
        ("Weekly newsletter", "news@example.com"),
    ];

    c.bench_function("find_provider", |b| {
        b.iter(|| {
            subjects
                .iter()
                .filter(|(subject, sender)| registry.find(subject, sender).is_some())
                .count()
        })
    });
}

fn bench_statement_rows(c: &mut Criterion) {
    let raw = fixture("cmbcc.eml");
    let message = parse_message("1", &raw).unwrap();
    let html = message.html_body().unwrap();

    c.bench_function("cmbcc_statement_rows", |b| {
        b.iter(|| statement_rows(&html))
    });
}

criterion_group!(
    benches,
    bench_parse_message,
    bench_find_provider,
    bench_statement_rows
);
criterion_main!(benches);
