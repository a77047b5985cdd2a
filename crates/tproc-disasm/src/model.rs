use anyhow::Result;
use std::path::Path;

const WORD_BYTES: usize = 8;

/// A raw program image: little-endian 64-bit words, word index == p_addr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub words: Vec<u64>,
}

impl Image {
    pub fn from_bytes(bytes: &[u8]) -> Result<Image> {
        anyhow::ensure!(
            bytes.len() % WORD_BYTES == 0,
            "image length {} is not a multiple of {WORD_BYTES} bytes",
            bytes.len()
        );
        let words = bytes
            .chunks_exact(WORD_BYTES)
            .map(|c| {
                let mut w = [0u8; WORD_BYTES];
                w.copy_from_slice(c);
                u64::from_le_bytes(w)
            })
            .collect();
        Ok(Image { words })
    }

    pub fn word(&self, addr: u32) -> Option<u64> {
        self.words.get(addr as usize).copied()
    }

    pub fn len(&self) -> u32 {
        self.words.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

pub fn load_raw_bin(path: &Path, skip: usize) -> Result<Image> {
    let file = std::fs::read(path)?;
    anyhow::ensure!(skip <= file.len(), "--skip exceeds file size");
    Image::from_bytes(&file[skip..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_skips_and_splits_words() {
        let cwd = std::env::current_dir().unwrap();
        let path = cwd.join("_test_prog.bin");
        let mut bytes = vec![0xEE, 0xEE];
        bytes.extend(0x3F00_0000_0000_0001u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let img = load_raw_bin(&path, 2).unwrap();
        assert_eq!(img.words, vec![0x3F00_0000_0000_0001]);
        assert_eq!(img.word(1), None);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn ragged_images_are_rejected() {
        assert!(Image::from_bytes(&[0; 12]).is_err());
        assert!(Image::from_bytes(&[]).unwrap().is_empty());
    }
}
