use alloc::{string::String, vec, vec::Vec};

use sdcard::{
    fat::{self, FatDirEntry},
    BlockDevice,
};

use super::path::join;
use super::Filesystem;
use crate::error::FsError;
use crate::types::{DirectoryListing, FileInfo};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    /// `*`/`?` glob when it holds a wildcard, substring otherwise. Empty
    /// matches everything.
    pub name_pattern: String,
    pub case_sensitive: bool,
    pub include_directories: bool,
    pub recursive: bool,
    /// Zero means no cap.
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            name_pattern: String::new(),
            case_sensitive: false,
            include_directories: false,
            recursive: true,
            max_results: 100,
        }
    }
}

impl SearchOptions {
    pub fn matching(pattern: &str) -> Self {
        Self {
            name_pattern: String::from(pattern),
            ..Self::default()
        }
    }
}

struct Frame {
    rel: String,
    entries: Vec<FatDirEntry>,
    next: usize,
}

impl<D: BlockDevice> Filesystem<'_, D> {
    /// Depth-first search below `root`. Each hit is named by its path
    /// relative to `root`.
    pub async fn search_files(
        &mut self,
        root: &str,
        options: &SearchOptions,
    ) -> Result<DirectoryListing, FsError> {
        let mut hits = DirectoryListing::new();
        let mut stack = vec![Frame {
            rel: String::new(),
            entries: fat::list_dir(self.sd, self.volume, root).await?,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(entry) = frame.entries.get(frame.next).copied() else {
                stack.pop();
                continue;
            };
            frame.next += 1;
            let rel = if frame.rel.is_empty() {
                String::from(entry.name())
            } else {
                join(&frame.rel, entry.name())
            };

            let wanted = !entry.is_dir() || options.include_directories;
            if wanted && name_matches(&options.name_pattern, entry.name(), options.case_sensitive)
            {
                hits.push(FileInfo::from_entry(rel.clone(), &entry));
                if options.max_results != 0 && hits.len() >= options.max_results {
                    break;
                }
            }
            if entry.is_dir() && options.recursive {
                self.volume.check_deadline()?;
                let dir = join(root, &rel);
                let entries = fat::list_dir(self.sd, self.volume, &dir).await?;
                stack.push(Frame {
                    rel,
                    entries,
                    next: 0,
                });
            }
        }
        Ok(hits)
    }
}

pub(crate) fn name_matches(pattern: &str, name: &str, case_sensitive: bool) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let fold = |ch: char| {
        if case_sensitive {
            ch
        } else {
            ch.to_ascii_lowercase()
        }
    };
    let pattern: Vec<char> = pattern.chars().map(fold).collect();
    let name: Vec<char> = name.chars().map(fold).collect();
    if pattern.iter().any(|ch| matches!(ch, '*' | '?')) {
        glob_match(&pattern, &name)
    } else {
        name.windows(pattern.len()).any(|window| window == pattern.as_slice())
    }
}

fn glob_match(pattern: &[char], name: &[char]) -> bool {
    let (mut p, mut n) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&ch) if ch == '?' || ch == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    p = star_p + 1;
                    n = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&ch| ch == '*')
}
