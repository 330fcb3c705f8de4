use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read `buf.len()` bytes. `Ok(false)` on a clean or torn EOF.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next frame, given the bytes left in the file. Returns the event
/// and its framed size; `Ok(None)` marks the end of the usable log.
fn decode_next(reader: &mut impl Read, remaining: u64) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_frame_part(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u64::from(u32::from_le_bytes(len_buf));
    // A corrupt length must not drive a huge allocation.
    if len + 8 > remaining {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_frame_part(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_frame_part(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len + 8)))
}

/// Append-only reservation log.
///
/// Each entry is `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// A torn or corrupt trailing entry ends replay; everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay the log at `path` (creating it if missing) and open it for
    /// appends. A torn or corrupt tail is cut off first so new entries land
    /// directly after the last valid one.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: events.len() as u64,
        };
        Ok((wal, events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an entry without syncing. Follow with `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write `events` to `<path>.wal.tmp` and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every valid entry, along with the byte length of the valid prefix.
    /// A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut consumed = 0u64;

        while let Some((event, framed)) = decode_next(&mut reader, total - consumed)? {
            consumed += framed;
            events.push(event);
        }
        if consumed < total {
            tracing::warn!(
                "wal {}: discarded {} trailing bytes after {} entries",
                path.display(),
                total - consumed,
                events.len()
            );
        }
        Ok((events, consumed))
    }
}
