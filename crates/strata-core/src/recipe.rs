use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StrataError};
use strata_protocol::{is_valid_file_name, RecipeHead, RECIPE_ENTRY_SIZE, RECIPE_HEAD_SIZE};

/// The three parallel recipe files kept per uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipePart {
    /// Fingerprint sequence.
    Plain,
    /// Existence-query entries.
    Secure,
    /// Per-chunk key material.
    Key,
}

impl RecipePart {
    pub const ALL: [RecipePart; 3] = [RecipePart::Plain, RecipePart::Secure, RecipePart::Key];

    fn extension(self) -> &'static str {
        match self {
            RecipePart::Plain => "recipe",
            RecipePart::Secure => "srecipe",
            RecipePart::Key => "krecipe",
        }
    }

    fn idx(self) -> usize {
        match self {
            RecipePart::Plain => 0,
            RecipePart::Secure => 1,
            RecipePart::Key => 2,
        }
    }
}

/// Directory of recipe files. File names are client-supplied, so they are
/// revalidated here before ever touching a path.
#[derive(Clone)]
pub struct RecipeStore {
    root: PathBuf,
}

impl RecipeStore {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn validate_name(name: &str) -> Result<()> {
        if !is_valid_file_name(name) {
            return Err(StrataError::InvalidRecipeName(name.to_string()));
        }
        Ok(())
    }

    fn path(&self, name: &str, part: RecipePart) -> PathBuf {
        self.root.join(format!("{name}.{}", part.extension()))
    }

    /// True when all three recipe files for `name` are present.
    pub fn exists_all(&self, name: &str) -> Result<bool> {
        Self::validate_name(name)?;
        for part in RecipePart::ALL {
            if !self.path(name, part).is_file() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Open the three recipe files for writing (truncating any previous
    /// upload of the same name) and write the announced head into each as
    /// a placeholder; `finalize` rewrites it with the real totals.
    pub fn create_writers(&self, name: &str, announced: RecipeHead) -> Result<RecipeWriterSet> {
        Self::validate_name(name)?;
        let mut files = Vec::with_capacity(3);
        for part in RecipePart::ALL {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(self.path(name, part))?;
            file.write_all(&announced.encode())?;
            files.push(file);
        }
        let files: [File; 3] = files.try_into().expect("three recipe parts");
        Ok(RecipeWriterSet {
            name: name.to_string(),
            files,
            entries_written: [0; 3],
            announced,
            final_size: None,
        })
    }

    /// Open the three recipe files for streaming. Consumes the plain head
    /// (it rides in the download-recipe login response) and skips the
    /// secure and key heads so every reader is positioned at entry zero.
    pub fn open_readers(&self, name: &str) -> Result<(RecipeReaderSet, RecipeHead)> {
        Self::validate_name(name)?;
        let mut files = Vec::with_capacity(3);
        let mut plain_head = RecipeHead::default();
        for part in RecipePart::ALL {
            let mut file = File::open(self.path(name, part))?;
            let mut head_bytes = [0u8; RECIPE_HEAD_SIZE];
            file.read_exact(&mut head_bytes).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    StrataError::InvalidFormat(format!(
                        "recipe file '{name}.{}' is shorter than its head",
                        part.extension()
                    ))
                } else {
                    e.into()
                }
            })?;
            if part == RecipePart::Plain {
                plain_head = RecipeHead::decode(&head_bytes)?;
            }
            files.push(file);
        }
        let files: [File; 3] = files.try_into().expect("three recipe parts");
        Ok((RecipeReaderSet { files }, plain_head))
    }
}

/// Append handles for one file's three recipes during upload.
pub struct RecipeWriterSet {
    name: String,
    files: [File; 3],
    entries_written: [u64; 3],
    announced: RecipeHead,
    final_size: Option<u64>,
}

impl RecipeWriterSet {
    /// Append raw entry bytes to one part.
    pub fn append(&mut self, part: RecipePart, payload: &[u8]) -> Result<()> {
        if payload.len() % RECIPE_ENTRY_SIZE != 0 {
            return Err(StrataError::InvalidFormat(format!(
                "recipe batch of {} bytes is not a whole number of {RECIPE_ENTRY_SIZE}-byte entries",
                payload.len()
            )));
        }
        self.files[part.idx()].write_all(payload)?;
        self.entries_written[part.idx()] += (payload.len() / RECIPE_ENTRY_SIZE) as u64;
        Ok(())
    }

    /// Record the file size announced at end-of-recipe; used in place of
    /// the login-time size when the heads are finalized.
    pub fn record_total_size(&mut self, head: RecipeHead) {
        self.final_size = Some(head.file_size);
    }

    pub fn entries_written(&self, part: RecipePart) -> u64 {
        self.entries_written[part.idx()]
    }

    /// Rewrite each part's head with the recorded file size and the number
    /// of entries actually appended, consuming the set.
    pub fn finalize(mut self) -> Result<()> {
        let file_size = self.final_size.unwrap_or(self.announced.file_size);
        for part in RecipePart::ALL {
            let head = RecipeHead {
                file_size,
                total_chunk_num: self.entries_written[part.idx()],
            };
            let file = &mut self.files[part.idx()];
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&head.encode())?;
            file.flush()?;
        }
        debug!(
            file = %self.name,
            plain = self.entries_written[0],
            secure = self.entries_written[1],
            key = self.entries_written[2],
            "recipe heads finalized"
        );
        Ok(())
    }
}

/// Sequential readers over one file's three recipes during download.
pub struct RecipeReaderSet {
    files: [File; 3],
}

impl RecipeReaderSet {
    /// Read up to `max_entries` whole entries from one part into `buf`
    /// (overwriting it). Returns the number of entries read; zero means
    /// end of that recipe. A trailing fragment of an entry is an error.
    pub fn read_entries(
        &mut self,
        part: RecipePart,
        buf: &mut Vec<u8>,
        max_entries: usize,
    ) -> Result<usize> {
        buf.resize(max_entries * RECIPE_ENTRY_SIZE, 0);
        let file = &mut self.files[part.idx()];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled % RECIPE_ENTRY_SIZE != 0 {
            return Err(StrataError::InvalidFormat(format!(
                "recipe ends mid-entry ({filled} bytes read)"
            )));
        }
        buf.truncate(filled);
        Ok(filled / RECIPE_ENTRY_SIZE)
    }
}
