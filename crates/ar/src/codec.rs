use anyhow::{Context, Result, bail};

use super::{Archive, DebugFlags, DebugSymbol};

pub(super) fn encode_payload(archive: &Archive) -> Result<Vec<u8>> {
    let file_count: u8 = archive
        .debug
        .files
        .len()
        .try_into()
        .context("archive holds more than 255 debug files")?;
    let symbol_count: u16 = archive
        .debug
        .symbols
        .len()
        .try_into()
        .context("archive holds more than 65535 debug symbols")?;
    let code_len: u16 = archive
        .instructions
        .len()
        .try_into()
        .context("archive holds more than 64 KiB of instructions")?;

    let mut out = Vec::with_capacity(64 + archive.instructions.len());

    out.push(file_count);
    for file in &archive.debug.files {
        write_bytes(&mut out, file.as_bytes())?;
    }

    write_u16(&mut out, symbol_count);
    for sym in &archive.debug.symbols {
        write_u16(&mut out, sym.address);
        out.push(sym.file);
        write_u16(&mut out, sym.line);
        write_u16(&mut out, sym.col);
        write_u32(&mut out, sym.offset);
        out.push(sym.flags.0);
    }

    write_u16(&mut out, code_len);
    out.extend_from_slice(&archive.instructions);

    Ok(out)
}

pub(super) fn decode_payload(bytes: &[u8]) -> Result<Archive> {
    let mut r = Reader { bytes, pos: 0 };
    let mut archive = Archive::new();

    let file_count = r.u8()?;
    for _ in 0..file_count {
        let raw = r.bytes_u16()?;
        let file = std::str::from_utf8(raw).context("debug file name is not valid utf-8")?;
        archive.debug.files.insert(file.to_string());
    }

    let symbol_count = r.u16()?;
    for _ in 0..symbol_count {
        archive.debug.symbols.push(DebugSymbol {
            address: r.u16()?,
            file: r.u8()?,
            line: r.u16()?,
            col: r.u16()?,
            offset: r.u32()?,
            flags: DebugFlags(r.u8()?),
        });
    }

    let code_len = r.u16()? as usize;
    archive.instructions = r.take(code_len)?.to_vec();

    Ok(archive)
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len: u16 = bytes
        .len()
        .try_into()
        .context("byte string exceeds 64 KiB frame limit")?;
    write_u16(out, len);
    out.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            bail!("truncated archive payload");
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn bytes_u16(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}
