//! Alipay (支付宝): statements arrive as encrypted ZIP attachments.

use std::path::{Path, PathBuf};

use super::{write_artifact, Provider};
use crate::error::{BillError, Result};
use crate::extract::{unlock, PasswordList, ZipBackend};
use crate::model::{ExtractOptions, Message};

#[derive(Debug, Clone, Copy, Default)]
pub struct Alipay;

impl Provider for Alipay {
    fn name(&self) -> &'static str {
        "alipay"
    }

    fn label(&self) -> &'static str {
        "支付宝"
    }

    fn artifact_suffix(&self) -> &'static str {
        ".zip"
    }

    /// Save every attachment as `alipay_{decoded name}`.
    fn stage(&self, message: &Message, output_dir: &Path) -> Result<Vec<PathBuf>> {
        if message.attachments.is_empty() {
            return Err(BillError::NoAttachment);
        }
        let prefix = self.prefix();
        message
            .attachments
            .iter()
            .map(|att| write_artifact(output_dir, &prefix, &att.filename, &att.data))
            .collect()
    }

    fn unpack(&self, artifact: &Path, extract_dir: &Path, options: &ExtractOptions) -> Result<Vec<PathBuf>> {
        let passwords = PasswordList::from_options(options)?;
        let unlocked = unlock(&ZipBackend, artifact, &passwords, extract_dir, &self.prefix())?;
        Ok(unlocked.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attachment;

    #[test]
    fn test_matches() {
        assert!(Alipay.matches("支付宝交易流水明细", ""));
        assert!(Alipay.matches("", "支付宝 <service@mail.alipay.com>"));
        assert!(!Alipay.matches("微信支付账单", "wechatpay@tencent.com"));
    }

    #[test]
    fn test_stage_saves_every_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let msg = Message::new("9", "支付宝", "")
            .with_attachment(Attachment::new("流水明细.zip", b"PK".to_vec()))
            .with_attachment(Attachment::new("readme.txt", b"hi".to_vec()));

        let paths = Alipay.stage(&msg, dir.path()).unwrap();
        assert_eq!(
            paths,
            vec![dir.path().join("alipay_流水明细.zip"), dir.path().join("alipay_readme.txt")]
        );
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"PK");
    }

    #[test]
    fn test_stage_without_attachment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Alipay.stage(&Message::new("1", "支付宝", ""), dir.path()).unwrap_err();
        assert!(matches!(err, BillError::NoAttachment));
    }

    #[test]
    fn test_long_attachment_name_stays_extractable() {
        let dir = tempfile::tempdir().unwrap();
        let long = format!("{}.zip", "支付宝交易明细".repeat(20));
        let msg = Message::new("3", "支付宝", "")
            .with_attachment(Attachment::new(&long, b"PK".to_vec()));

        let paths = Alipay.stage(&msg, dir.path()).unwrap();
        let name = paths[0].file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= 255);
        assert!(paths[0].is_file());
        assert!(Alipay.accepts(&paths[0]));
    }

    #[test]
    fn test_only_prefixed_zips_are_accepted() {
        assert!(Alipay.accepts(Path::new("alipay_流水明细.zip")));
        assert!(!Alipay.accepts(Path::new("alipay_readme.txt")));
        assert!(!Alipay.accepts(Path::new("invoice_report.zip")));
        assert!(!Alipay.accepts(Path::new("wechat_bill.zip")));
    }
}
