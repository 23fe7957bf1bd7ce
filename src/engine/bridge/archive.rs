//! Tar archive helpers for moving single files across the container boundary.

use std::io::{self, Read};

use tar::{Archive, Builder, EntryType, Header};

/// Build a tar archive holding exactly one regular file.
///
/// The engine's upload API only accepts tar payloads, so even a single source
/// file travels as an archive.
pub(super) fn build_file_archive(
    file_name: &str,
    contents: &[u8],
    mode: u32,
) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(vec![]);

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_cksum();

    builder.append_data(&mut header, file_name, contents)?;
    builder.finish()?;
    builder.into_inner()
}

/// Extract a named regular file from a tar archive.
///
/// The engine's download API wraps the requested path in an archive; entries
/// are matched on file name so both `program` and `workspace/program` layouts
/// resolve. Returns `None` when no matching entry exists.
pub(super) fn extract_file(archive_bytes: &[u8], file_name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut archive = Archive::new(archive_bytes);

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let matches = {
            let path = entry.path()?;
            path.file_name().and_then(|name| name.to_str()) == Some(file_name)
        };
        if !matches {
            continue;
        }

        let mut contents = vec![];
        entry.read_to_end(&mut contents)?;
        return Ok(Some(contents));
    }

    Ok(None)
}
