//! RMID files embed a Standard Midi File inside a RIFF container.
//! Reading them is supported by unwrapping the input slice, stripping away the RIFF wrappers
//! around the raw SMF bytes.

use crate::prelude::*;

/// Iterates over little-endian RIFF chunks, yielding their id and body.
struct RiffChunks<'a>(&'a [u8]);
impl<'a> Iterator for RiffChunks<'a> {
    type Item = ([u8; 4], &'a [u8]);
    fn next(&mut self) -> Option<([u8; 4], &'a [u8])> {
        let header = self.0.split_checked(8)?;
        let mut id = [0; 4];
        let mut len = [0; 4];
        id.copy_from_slice(&header[..4]);
        len.copy_from_slice(&header[4..]);
        let len = u32::from_le_bytes(len) as usize;
        let body = match self.0.split_checked(len) {
            Some(body) => body,
            None => mem::take(&mut self.0),
        };
        //Chunks are padded to even sizes
        if len % 2 == 1 {
            let _pad = self.0.split_checked(1);
        }
        Some((id, body))
    }
}

/// Whether the raw bytes look like a RIFF container rather than a bare SMF.
pub(crate) fn is_riff(raw: &[u8]) -> bool {
    raw.starts_with(b"RIFF")
}

/// Extract the SMF bytes out of an RMID file.
pub(crate) fn unwrap(raw: &[u8]) -> Result<&[u8]> {
    let (id, mut riff) = RiffChunks(raw)
        .next()
        .ok_or(err_malformed_file!("no main riff chunk"))?;
    ensure!(&id == b"RIFF", err_malformed_file!("invalid main riff chunk"));
    let formtype = riff
        .split_checked(4)
        .ok_or(err_malformed_file!("failed to read riff formtype"))?;
    ensure!(formtype == b"RMID", err_malformed_file!("not an rmid riff file"));
    RiffChunks(riff)
        .find(|(id, _)| id == b"data")
        .map(|(_, chunk)| chunk)
        .ok_or_else(|| err_malformed_file!("no rmid data chunk").into())
}
