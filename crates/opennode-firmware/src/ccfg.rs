//! Customer configuration (CCFG) verification
//!
//! CC26xx/CC13xx parts keep their boot configuration in the last 88 bytes of
//! flash. A firmware that writes a bad bootloader word there makes the ROM
//! bootloader unreachable, which bricks a test-bed node that can only be
//! recovered through it. Images are therefore checked before flashing.

use std::path::Path;
use std::time::Duration;

use opennode_core::{NodeError, NodeResult};
use opennode_process::{CommandSpec, ToolRunner};
use tracing::{debug, warn};

use crate::intel_hex::IntelHex;

/// Start address of the CCFG page
pub const CCFG_OFFSET: u32 = 0x0001_FFA8;
/// Size of the CCFG page in bytes
pub const CCFG_SIZE: usize = 88;
/// Position of the bootloader configuration word inside the page
pub const BOOTLOADER_CFG_RANGE: std::ops::Range<usize> = 48..52;

/// Unprogrammed flash: the image leaves the page alone
pub const BLANK_SIGNATURE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
/// Bootloader enabled with the expected backdoor configuration
pub const BOOTLOADER_SIGNATURE: [u8; 4] = [0xC5, 0x0B, 0xFE, 0xC5];

/// Default budget for the conversion step
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(100);

/// Outcome of a CCFG inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcfgVerdict {
    /// Bootloader word left blank
    Blank,
    /// Bootloader word holds the known-good configuration
    BootloaderEnabled,
    /// Any other value
    Rejected([u8; 4]),
}

impl CcfgVerdict {
    pub fn is_valid(&self) -> bool {
        !matches!(self, CcfgVerdict::Rejected(_))
    }
}

/// Classify a CCFG page by its bootloader configuration word
pub fn classify_ccfg(block: &[u8; CCFG_SIZE]) -> CcfgVerdict {
    let mut word = [0u8; 4];
    word.copy_from_slice(&block[BOOTLOADER_CFG_RANGE]);
    match word {
        BLANK_SIGNATURE => CcfgVerdict::Blank,
        BOOTLOADER_SIGNATURE => CcfgVerdict::BootloaderEnabled,
        other => CcfgVerdict::Rejected(other),
    }
}

/// Checks firmware images for a safe CCFG page
///
/// The image is converted with `objcopy -I elf32-big -O ihex` into a
/// temporary file; the source image is never modified.
#[derive(Debug, Clone)]
pub struct FirmwareVerifier {
    runner: ToolRunner,
    converter: CommandSpec,
}

impl Default for FirmwareVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareVerifier {
    pub fn new() -> Self {
        Self {
            runner: ToolRunner::new(DEFAULT_VERIFY_TIMEOUT),
            converter: CommandSpec::new("objcopy"),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.runner = self.runner.with_timeout(timeout);
        self
    }

    /// Show converter output instead of discarding it
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.runner = self.runner.verbose(verbose);
        self
    }

    /// Use another objcopy-compatible converter
    ///
    /// The conversion arguments are appended to `converter`.
    pub fn with_converter(mut self, converter: CommandSpec) -> Self {
        self.converter = converter;
        self
    }

    /// Whether `firmware` carries an acceptable CCFG page
    ///
    /// Conversion failures and timeouts count as invalid.
    pub async fn has_valid_ccfg(&self, firmware: &Path) -> bool {
        match self.verify(firmware).await {
            Ok(verdict) => verdict.is_valid(),
            Err(e) => {
                warn!(firmware = %firmware.display(), error = %e, "CCFG verification failed");
                false
            }
        }
    }

    /// Convert `firmware` and classify its CCFG page
    pub async fn verify(&self, firmware: &Path) -> NodeResult<CcfgVerdict> {
        let hex_file = tempfile::Builder::new()
            .prefix("opennode-ccfg-")
            .suffix(".hex")
            .tempfile()
            .map_err(|e| NodeError::Io(format!("temporary hex file: {}", e)))?;

        let cmd = self
            .converter
            .clone()
            .args(["-I", "elf32-big", "-O", "ihex"])
            .arg(firmware.to_string_lossy())
            .arg(hex_file.path().to_string_lossy());
        self.runner.run(&cmd).await?;

        let text = tokio::fs::read_to_string(hex_file.path())
            .await
            .map_err(|e| NodeError::Io(format!("read converted image: {}", e)))?;
        let image = IntelHex::parse(&text)
            .map_err(|e| NodeError::VerificationRejected(format!("converted image: {}", e)))?;

        let mut block = [0xFF; CCFG_SIZE];
        block.copy_from_slice(&image.to_bin_array(CCFG_OFFSET, CCFG_SIZE, 0xFF));
        let verdict = classify_ccfg(&block);

        debug!(
            firmware = %firmware.display(),
            word = %hex::encode(&block[BOOTLOADER_CFG_RANGE]),
            ?verdict,
            "CCFG inspected"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block_with(word: [u8; 4]) -> [u8; CCFG_SIZE] {
        let mut block = [0u8; CCFG_SIZE];
        block[BOOTLOADER_CFG_RANGE].copy_from_slice(&word);
        block
    }

    #[test]
    fn test_classify_signatures() {
        assert_eq!(classify_ccfg(&block_with([0xFF; 4])), CcfgVerdict::Blank);
        assert_eq!(
            classify_ccfg(&block_with([0xC5, 0x0B, 0xFE, 0xC5])),
            CcfgVerdict::BootloaderEnabled
        );
        assert_eq!(
            classify_ccfg(&block_with([0x00; 4])),
            CcfgVerdict::Rejected([0x00; 4])
        );
    }

    #[test]
    fn test_only_bootloader_word_matters() {
        let mut block = [0x5A; CCFG_SIZE];
        block[BOOTLOADER_CFG_RANGE].copy_from_slice(&BLANK_SIGNATURE);
        assert!(classify_ccfg(&block).is_valid());

        // one bit off the known signature
        let block = block_with([0xC5, 0x0B, 0xFE, 0xC4]);
        assert!(!classify_ccfg(&block).is_valid());
    }

    /// objcopy stand-in: a shell script run with the objcopy argv
    fn fake_converter(dir: &TempDir, body: &str) -> CommandSpec {
        let path = dir.path().join("objcopy.sh");
        std::fs::write(&path, format!("{}\n", body)).unwrap();
        CommandSpec::new("sh").arg(path.to_string_lossy())
    }

    fn hex_record(count: u8, address: u16, kind: u8, data: &[u8]) -> String {
        let mut bytes = vec![count, (address >> 8) as u8, address as u8, kind];
        bytes.extend_from_slice(data);
        let checksum = bytes
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            .wrapping_neg();
        bytes.push(checksum);
        format!(":{}\n", hex::encode_upper(bytes))
    }

    /// HEX image whose CCFG page holds `word` at the bootloader position
    fn image_with_word(word: [u8; 4]) -> String {
        let word_address = (CCFG_OFFSET as usize + BOOTLOADER_CFG_RANGE.start) as u16;
        let mut text = hex_record(2, 0, 0x04, &[0x00, 0x01]);
        text += &hex_record(4, word_address, 0x00, &word);
        text += &hex_record(0, 0, 0x01, &[]);
        text
    }

    /// Converter copying a prepared HEX file ($5) to the output ($6)
    fn copying_verifier(dir: &TempDir) -> FirmwareVerifier {
        FirmwareVerifier::new().with_converter(fake_converter(dir, "cp \"$5\" \"$6\""))
    }

    #[tokio::test]
    async fn test_verifier_accepts_known_signatures() {
        let dir = TempDir::new().unwrap();
        let verifier = copying_verifier(&dir);

        let blank = dir.path().join("blank.elf");
        std::fs::write(&blank, hex_record(0, 0, 0x01, &[])).unwrap();
        assert_eq!(verifier.verify(&blank).await.unwrap(), CcfgVerdict::Blank);
        assert!(verifier.has_valid_ccfg(&blank).await);

        let bootloader = dir.path().join("bootloader.elf");
        std::fs::write(&bootloader, image_with_word(BOOTLOADER_SIGNATURE)).unwrap();
        assert_eq!(
            verifier.verify(&bootloader).await.unwrap(),
            CcfgVerdict::BootloaderEnabled
        );
    }

    #[tokio::test]
    async fn test_verifier_rejects_bad_word() {
        let dir = TempDir::new().unwrap();
        let verifier = copying_verifier(&dir);

        let firmware = dir.path().join("bricking.elf");
        std::fs::write(&firmware, image_with_word([0x00; 4])).unwrap();
        assert!(!verifier.has_valid_ccfg(&firmware).await);
        // source image untouched
        assert_eq!(
            std::fs::read_to_string(&firmware).unwrap(),
            image_with_word([0x00; 4])
        );
    }

    #[tokio::test]
    async fn test_converter_failure_is_invalid() {
        let dir = TempDir::new().unwrap();
        let verifier = FirmwareVerifier::new().with_converter(fake_converter(&dir, "exit 1"));
        assert!(!verifier.has_valid_ccfg(Path::new("/tmp/missing.elf")).await);

        let verifier =
            FirmwareVerifier::new().with_converter(CommandSpec::new("/nonexistent/objcopy"));
        assert!(!verifier.has_valid_ccfg(Path::new("/tmp/missing.elf")).await);
    }

    #[tokio::test]
    async fn test_converter_timeout_is_invalid() {
        let dir = TempDir::new().unwrap();
        let converter = fake_converter(&dir, "exec sleep 5");
        let verifier = FirmwareVerifier::new()
            .with_converter(converter)
            .with_timeout(Duration::from_millis(200));

        let err = verifier.verify(Path::new("/tmp/fw.elf")).await.unwrap_err();
        assert!(matches!(err, NodeError::ToolTimeout { .. }));
        assert!(!verifier.has_valid_ccfg(Path::new("/tmp/fw.elf")).await);
    }

    #[tokio::test]
    async fn test_garbage_output_is_invalid() {
        let dir = TempDir::new().unwrap();
        let verifier = FirmwareVerifier::new()
            .with_converter(fake_converter(&dir, "echo 'not hex' > \"$6\""));
        let err = verifier.verify(Path::new("/tmp/fw.elf")).await.unwrap_err();
        assert!(matches!(err, NodeError::VerificationRejected(_)));
    }
}
