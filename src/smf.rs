//! Reading and writing Standard Midi Files.
//!
//! A file is a header chunk (`MThd`) followed by one track chunk (`MTrk`) per track.
//! Every track chunk is a list of (delta time, event) pairs ending with an End-of-Track meta
//! event.
//!
//! Only file types 0 and 1 are supported. Unknown chunks are skipped, and RIFF `RMID` wrappers
//! are transparently stripped away.

use crate::{
    message::{short_msg_len, Message, MetaMessage, ShortMessage, SysexMessage},
    prelude::*,
    primitive::{push_varlen_slice, push_vlq, read_varlen_slice, read_vlq},
    riff,
    sequence::{DivisionType, Sequence},
    track::{MidiEvent, Track},
};
use std::{fs, path::Path};

/// How many bytes must the track chunks of a file have in order to parse them in parallel.
#[cfg(feature = "parallel")]
const PARALLEL_ENABLE_THRESHOLD: usize = 3 * 1024;

/// Knobs for the file reader.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ReadOptions {
    /// Reject uncompliant files with `ErrorKind::MalformedFile` instead of reading as much as
    /// possible out of them.
    ///
    /// Defaults to `true` only if the `strict` feature is enabled.
    pub strict: bool,
}
impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions {
            strict: cfg!(feature = "strict"),
        }
    }
}
impl ReadOptions {
    #[inline]
    pub fn strict() -> ReadOptions {
        ReadOptions { strict: true }
    }

    #[inline]
    pub fn permissive() -> ReadOptions {
        ReadOptions { strict: false }
    }
}

/// The information in a file header, available without parsing any track.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FileFormat {
    pub file_type: u16,
    pub division_type: DivisionType,
    pub resolution: u16,
    /// The track count declared in the header, which may disagree with the actual amount of
    /// track chunks.
    pub track_count: u16,
}

/// The file types a sequence can be written as.
///
/// Type 0 holds exactly one track, so it is only offered for sequences with at most one track.
pub fn file_types(sequence: &Sequence) -> &'static [u16] {
    if sequence.tracks().len() <= 1 {
        &[0, 1]
    } else {
        &[1]
    }
}

/// Whether `sequence` can be written as the given file type.
pub fn is_file_type_supported(file_type: u16, sequence: &Sequence) -> bool {
    file_types(sequence).contains(&file_type)
}

/// Encode a division type and resolution into the 16-bit header field.
fn encode_division(division_type: DivisionType, resolution: u16) -> u16 {
    match division_type.smpte_fps() {
        None => resolution & 0x7FFF,
        Some(fps) => ((-(fps as i8)) as u8 as u16) << 8 | (resolution & 0xFF),
    }
}

fn decode_division(raw: u16) -> Result<(DivisionType, u16)> {
    if raw & 0x8000 != 0 {
        let fps = -((raw >> 8) as u8 as i8);
        let division_type = DivisionType::from_smpte_fps(fps as u8)
            .ok_or(err_division!("smpte frame rate is not 24, 25, 29 or 30"))?;
        Ok((division_type, raw & 0xFF))
    } else {
        Ok((DivisionType::Ppq, raw & 0x7FFF))
    }
}

/// Split off the next chunk, skipping unknown chunk types.
///
/// Returns `None` at end of input.
fn read_chunk<'a>(raw: &mut &'a [u8], strict: bool) -> Result<Option<([u8; 4], &'a [u8])>> {
    loop {
        if raw.is_empty() {
            return Ok(None);
        }
        let id = raw
            .split_checked(4)
            .ok_or(err_malformed_file!("failed to read chunk id"))?;
        let len = u32::read(raw).context(err_malformed_file!("failed to read chunk length"))?;
        let data = match raw.split_checked(len as usize) {
            Some(data) => data,
            None => {
                ensure!(!strict, err_malformed_file!("reached eof before chunk ended"));
                log::warn!("chunk is longer than the file, using the remainder of the file");
                mem::take(raw)
            }
        };
        match id {
            b"MThd" | b"MTrk" => {
                let mut tag = [0; 4];
                tag.copy_from_slice(id);
                return Ok(Some((tag, data)));
            }
            _ => log::debug!("skipping unknown chunk {:?}", String::from_utf8_lossy(id)),
        }
    }
}

fn read_header_chunk(raw: &mut &[u8], strict: bool) -> Result<FileFormat> {
    let (id, mut header) = read_chunk(raw, strict)?.ok_or(err_malformed_file!("empty file"))?;
    ensure!(&id == b"MThd", err_malformed_file!("expected header chunk, found track"));
    let file_type = u16::read(&mut header).context(err_malformed_file!("truncated header"))?;
    let track_count = u16::read(&mut header).context(err_malformed_file!("truncated header"))?;
    let division = u16::read(&mut header).context(err_malformed_file!("truncated header"))?;
    ensure!(
        file_type != 2,
        err_malformed_file!("sequential (type 2) files are not supported")
    );
    ensure!(
        file_type < 2,
        err_malformed_file!("unknown standard midi file type")
    );
    let (division_type, resolution) = decode_division(division)?;
    Ok(FileFormat {
        file_type,
        division_type,
        resolution,
        track_count,
    })
}

/// Strip an optional RIFF wrapper.
fn unwrap_container(raw: &[u8]) -> Result<&[u8]> {
    if riff::is_riff(raw) {
        riff::unwrap(raw)
    } else {
        Ok(raw)
    }
}

/// Read only the header of a file.
pub fn read_header(raw: &[u8]) -> Result<FileFormat> {
    let mut raw = unwrap_container(raw)?;
    read_header_chunk(&mut raw, true)
}

/// Parse a whole file into a sequence.
///
/// In permissive mode a track is cut short at the first unreadable event, and header
/// inconsistencies are logged and ignored.
pub fn read(raw: &[u8], options: ReadOptions) -> Result<Sequence> {
    let strict = options.strict;
    let mut raw = unwrap_container(raw)?;
    let format = read_header_chunk(&mut raw, strict)?;
    let mut sequence = Sequence::new(format.division_type, format.resolution)
        .context(err_malformed_file!("invalid resolution in header"))?;

    let mut chunks = Vec::with_capacity(format.track_count as usize);
    while let Some((id, data)) = read_chunk(&mut raw, strict)? {
        if &id == b"MTrk" {
            chunks.push(data);
        } else {
            ensure!(!strict, err_malformed_file!("found duplicate header"));
            log::warn!("ignoring duplicate header chunk");
        }
    }
    if chunks.len() != format.track_count as usize {
        ensure!(
            !strict,
            err_malformed_file!("file has a different amount of tracks than declared")
        );
        log::warn!(
            "header declares {} tracks but the file has {}",
            format.track_count,
            chunks.len()
        );
    }
    if format.file_type == 0 && chunks.len() != 1 {
        ensure!(!strict, err_malformed_file!("type 0 file must have exactly one track"));
        log::warn!("type 0 file has {} tracks", chunks.len());
    }

    for track in read_tracks(chunks, strict)? {
        sequence.add_track(track);
    }
    Ok(sequence)
}

fn read_tracks(chunks: Vec<&[u8]>, strict: bool) -> Result<Vec<Track>> {
    //Attempt to use multiple threads if possible and advantageous
    #[cfg(feature = "parallel")]
    {
        let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        if total >= PARALLEL_ENABLE_THRESHOLD {
            use rayon::prelude::*;

            return chunks
                .into_par_iter()
                .map(|chunk| read_track(chunk, strict))
                .collect::<Result<Vec<Track>>>();
        }
    }
    //Fall back to single-threaded
    chunks
        .into_iter()
        .map(|chunk| read_track(chunk, strict))
        .collect()
}

fn read_track(mut raw: &[u8], strict: bool) -> Result<Track> {
    let mut track = Track::new();
    let mut tick: i64 = 0;
    let mut running_status = None;
    let mut terminated = false;
    while !raw.is_empty() {
        match read_event(&mut raw, &mut running_status) {
            Ok((delta, message)) => {
                tick += delta as i64;
                let eot = matches!(&message, Message::Meta(meta) if meta.is_end_of_track());
                track.add(MidiEvent::new(message, tick));
                if eot {
                    terminated = true;
                    break;
                }
            }
            Err(err) => {
                if strict {
                    return Err(err).context(err_malformed_file!("malformed track event"));
                }
                log::warn!(
                    "dropping the rest of a track after an unreadable event: {:?}",
                    err
                );
                break;
            }
        }
    }
    if !terminated {
        ensure!(!strict, err_malformed_file!("track is missing its end of track event"));
        log::warn!("track is missing its end of track event");
    } else if !raw.is_empty() {
        log::debug!("ignoring {} bytes after end of track", raw.len());
    }
    Ok(track)
}

/// Read a single (delta time, message) pair, advancing the slice and updating running status.
///
/// In case of failure the slice might be left in the middle of an event.
fn read_event(raw: &mut &[u8], running_status: &mut Option<u8>) -> Result<(u32, Message)> {
    let delta = read_vlq(raw).context(err_malformed_msg!("failed to read event delta time"))?;
    let mut status = *raw
        .first()
        .ok_or(err_truncated!("failed to read event status"))?;
    if status < 0x80 {
        //Running status
        status = running_status.ok_or(err_malformed_msg!(
            "event missing status with no running status active"
        ))?;
    } else {
        *raw = &raw[1..];
    }
    let message = match status {
        0x80..=0xEF => {
            *running_status = Some(status);
            let data_len = short_msg_len(status).unwrap_or(1) - 1;
            let data = raw
                .split_checked(data_len)
                .ok_or(err_truncated!("truncated channel message"))?;
            Message::Short(ShortMessage::new(
                status,
                data.first().copied().unwrap_or(0),
                data.get(1).copied().unwrap_or(0),
            )?)
        }
        0xFF => {
            *running_status = None;
            Message::Meta(MetaMessage::read(raw)?)
        }
        0xF0 | 0xF7 => {
            *running_status = None;
            let data = read_varlen_slice(raw)?;
            Message::Sysex(SysexMessage::new(status, data)?)
        }
        _ => bail!(err_malformed_msg!(
            "standard midi files cannot contain system common or realtime events"
        )),
    };
    Ok((delta, message))
}

/// Read a file from the filesystem.
pub fn read_file<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Sequence> {
    let raw = fs::read(path).context(err_io!("failed to read midi file"))?;
    read(&raw, options)
}

/// Write a sequence as the given file type, returning the amount of bytes written.
///
/// Every track gets an End-of-Track event appended if it does not already end with one.
/// Channel messages are always written with an explicit status.
/// System common and realtime messages have no file representation and are rejected with
/// `ErrorKind::InvalidParameter`.
pub fn write<W: io::Write>(sequence: &Sequence, file_type: u16, out: &mut W) -> Result<usize> {
    ensure!(
        is_file_type_supported(file_type, sequence),
        err_param!("file type not supported for this sequence")
    );
    let track_count = u16::try_from(sequence.tracks().len())
        .map_err(|_| err_param!("track count exceeds 16 bit range"))?;

    let mut header = [0; 4 + 4 + 6];
    header[0..4].copy_from_slice(b"MThd");
    header[4..8].copy_from_slice(&6u32.to_be_bytes());
    header[8..10].copy_from_slice(&file_type.to_be_bytes());
    header[10..12].copy_from_slice(&track_count.to_be_bytes());
    header[12..14].copy_from_slice(
        &encode_division(sequence.division_type(), sequence.resolution()).to_be_bytes(),
    );
    out.write_all(&header)
        .context(err_io!("failed to write header chunk"))?;
    let mut written = header.len();

    //Write tracks into a reusable buffer so that chunk lengths are known
    let mut track_chunk = Vec::with_capacity(8 * 1024);
    for track in sequence.tracks() {
        write_track(track, &mut track_chunk)?;
        out.write_all(&track_chunk)
            .context(err_io!("failed to write track chunk"))?;
        written += track_chunk.len();
        track_chunk.clear();
    }
    out.flush().context(err_io!("failed to flush output"))?;
    Ok(written)
}

/// Write a sequence to a file, creating or truncating it.
pub fn write_file<P: AsRef<Path>>(sequence: &Sequence, file_type: u16, path: P) -> Result<usize> {
    let file = fs::File::create(path).context(err_io!("failed to create midi file"))?;
    write(sequence, file_type, &mut io::BufWriter::new(file))
}

/// Write a track chunk into an empty `Vec`.
fn write_track(track: &Track, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(b"MTrk\0\0\0\0");
    let mut last_tick = 0;
    let mut terminated = false;
    for ev in track {
        let tick = ev.tick().max(last_tick);
        let delta = u32::try_from(tick - last_tick)
            .map_err(|_| err_param!("delta time exceeds 32 bit range"))?;
        last_tick = tick;
        push_vlq(delta, out);
        match ev.message() {
            Message::Short(msg) => {
                ensure!(
                    msg.is_channel(),
                    err_param!("standard midi files cannot contain system common or realtime events")
                );
                out.extend_from_slice(msg.as_bytes())
            }
            Message::Meta(msg) => out.extend_from_slice(msg.as_bytes()),
            Message::Sysex(msg) => {
                out.push(msg.status());
                push_varlen_slice(msg.data(), out)?;
            }
        }
        terminated = matches!(ev.message(), Message::Meta(meta) if meta.is_end_of_track());
    }
    if !terminated {
        push_vlq(0, out);
        out.extend_from_slice(MetaMessage::end_of_track().as_bytes());
    }
    let len = u32::try_from(out.len() - 8)
        .map_err(|_| err_param!("midi chunk size exceeds 32 bit range"))?;
    out[4..8].copy_from_slice(&len.to_be_bytes());
    Ok(())
}
