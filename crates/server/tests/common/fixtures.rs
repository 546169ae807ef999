//! Test fixtures for generating archives.

use sitesync_core::PlannedFile;
use sitesync_storage::ArchiveWriter;
use tempfile::TempDir;

/// A local source tree that chunk bodies are packed from.
#[allow(dead_code)]
pub struct SourceTree {
    dir: TempDir,
}

#[allow(dead_code)]
impl SourceTree {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create source directory");
        for (path, contents) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create parent directory");
            }
            std::fs::write(full, contents).expect("Failed to write source file");
        }
        Self { dir }
    }

    /// Pack the named files into an archive and return its bytes.
    pub fn archive(&self, paths: &[&str]) -> Vec<u8> {
        let files: Vec<PlannedFile> = paths
            .iter()
            .map(|path| PlannedFile {
                path: path.to_string(),
                size: std::fs::metadata(self.dir.path().join(path))
                    .expect("Failed to stat source file")
                    .len(),
            })
            .collect();

        let out = tempfile::tempdir().expect("Failed to create output directory");
        let dest = out.path().join("chunk.tar.zst");
        ArchiveWriter::new(3)
            .write(self.dir.path(), &files, &dest)
            .expect("Failed to write archive");
        std::fs::read(dest).expect("Failed to read archive")
    }
}
