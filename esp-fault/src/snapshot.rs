//! Crash snapshots
//!
//! A snapshot is an ELF core file holding the faulting stack and the register
//! state, loadable by `xtensa-esp32-elf-gdb` next to the application image.
//! Its layout:
//!
//! ```text
//! 0x00  ELF header
//! 0x34  program header: PT_LOAD, the stack window
//! 0x54  program header: PT_NOTE, the registers
//! 0x74  stack window contents
//! ....  "CORE" note: prstatus + xtensa register set
//! ```
//!
//! Snapshots are either printed as hex for host side capture
//! ([`TransportSnapshot`]) or written to storage ([`StorageSnapshot`]).

use core::ops::Range;

use embedded_io::Write;

use crate::{
    Error,
    backtrace::StackLayout,
    cpu::CoreId,
    frame::ExceptionFrame,
    platform::MemoryAccess,
    sink::RawSink,
};

const HEADER_SIZE: u32 = 0x34;
const PROGRAM_HEADER_SIZE: u32 = 0x20;
const PROGRAM_HEADER_COUNT: u32 = 2;
const DATA_OFFSET: u32 = HEADER_SIZE + PROGRAM_HEADER_COUNT * PROGRAM_HEADER_SIZE;

const NOTE_HEADER_SIZE: u32 = 20;
const PRSTATUS_SIZE: usize = 72;
const REGISTERS_SIZE: usize = 128 * 4;
const REGISTER_INFO_SIZE: usize = PRSTATUS_SIZE + REGISTERS_SIZE + 4;

// namesz = 8, descsz = 0x24c, type = NT_PRSTATUS, name = "CORE\0" padded
const NOTE_HEADER: [u8; NOTE_HEADER_SIZE as usize] = [
    0x08, 0x00, 0x00, 0x00, 0x4c, 0x02, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x43, 0x4f, 0x52,
    0x45, 0x00, 0x00, 0x00, 0x00,
];

// Read + write
const SEGMENT_FLAGS: u32 = 6;

/// Marks the start of a snapshot in storage.
pub const STORAGE_MAGIC_START: u32 = 0xDEAD_BEEF;
/// Marks the end of a snapshot in storage.
pub const STORAGE_MAGIC_END: u32 = 0xACDC_FEED;

enum SegmentType {
    Load = 1,
    Note = 4,
}

/// Everything captured about a fault.
pub struct Snapshot<'a> {
    frame: &'a ExceptionFrame,
    core: CoreId,
    memory: &'a dyn MemoryAccess,
    stack: Range<u32>,
}

impl<'a> Snapshot<'a> {
    /// Captures up to `stack_size` bytes of stack above the frame's stack
    /// pointer, clipped to the end of the stack range. No stack is captured if
    /// the stack pointer is not sane.
    pub fn new(
        frame: &'a ExceptionFrame,
        core: CoreId,
        memory: &'a dyn MemoryAccess,
        layout: &StackLayout,
        stack_size: u32,
    ) -> Self {
        let sp = frame.sp();
        let stack = if layout.is_sane_sp(sp) {
            let end = sp.saturating_add(stack_size & !3).min(layout.stack_end());
            sp..end
        } else {
            sp..sp
        };

        Self {
            frame,
            core,
            memory,
            stack,
        }
    }

    /// The captured frame.
    pub fn frame(&self) -> &ExceptionFrame {
        self.frame
    }

    /// The core that faulted.
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// The captured stack window.
    pub fn stack(&self) -> Range<u32> {
        self.stack.clone()
    }

    fn stack_len(&self) -> u32 {
        self.stack.end - self.stack.start
    }

    /// Size of the ELF file written by [`write_elf`](Self::write_elf).
    pub fn elf_len(&self) -> u32 {
        DATA_OFFSET + self.stack_len() + NOTE_HEADER_SIZE + REGISTER_INFO_SIZE as u32
    }

    /// Writes the snapshot as an ELF core file.
    pub fn write_elf<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), W::Error> {
        write_elf_header(writer)?;

        write_program_header(
            writer,
            SegmentType::Load,
            DATA_OFFSET,
            self.stack.start,
            self.stack_len(),
            SEGMENT_FLAGS,
        )?;
        write_program_header(
            writer,
            SegmentType::Note,
            DATA_OFFSET + self.stack_len(),
            0,
            NOTE_HEADER_SIZE + REGISTER_INFO_SIZE as u32,
            SEGMENT_FLAGS,
        )?;

        for address in self.stack.clone().step_by(4) {
            writer.write_all(&self.memory.read_word(address).to_le_bytes())?;
        }

        writer.write_all(&NOTE_HEADER)?;
        writer.write_all(&self.register_info())?;

        Ok(())
    }

    // prstatus, then the register set in the layout of gdb's xtensa_elf_gregset_t,
    // then a reserved word.
    fn register_info(&self) -> [u8; REGISTER_INFO_SIZE] {
        let mut info = [0u8; REGISTER_INFO_SIZE];

        // pr_pid
        info[24..28].copy_from_slice(&self.core.index().to_le_bytes());

        let frame = self.frame;
        let head = [
            frame.PC,
            frame.PS,
            frame.LBEG,
            frame.LEND,
            frame.LCOUNT,
            frame.SAR,
            // windowstart: only the current window is live
            1,
            // windowbase
            0,
        ];

        let registers = &mut info[PRSTATUS_SIZE..][..REGISTERS_SIZE];
        let (head_bytes, rest) = registers.split_at_mut(head.len() * 4);
        for (chunk, value) in head_bytes.chunks_exact_mut(4).zip(head) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }

        // 56 reserved words precede ar0..ar63
        let ar = &mut rest[56 * 4..];
        for (chunk, value) in ar.chunks_exact_mut(4).zip(frame.address_registers()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }

        info
    }
}

fn write_elf_header<W: Write + ?Sized>(writer: &mut W) -> Result<(), W::Error> {
    writer.write_all(&[0x7f, b'E', b'L', b'F'])?;
    writer.write_all(&[0x01])?; // 32 bit
    writer.write_all(&[0x01])?; // little endian
    writer.write_all(&[0x01])?; // version
    writer.write_all(&[0x00])?; // ABI
    writer.write_all(&[0x00])?; // ABI version
    writer.write_all(&[0x00; 7])?; // padding
    writer.write_all(&[0x04, 0x00])?; // CORE file
    writer.write_all(&[0x5e, 0x00])?; // machine (Xtensa)
    writer.write_all(&1u32.to_le_bytes())?; // version
    writer.write_all(&0u32.to_le_bytes())?; // entry
    writer.write_all(&HEADER_SIZE.to_le_bytes())?; // start of program header
    writer.write_all(&0u32.to_le_bytes())?; // start of section header
    writer.write_all(&0u32.to_le_bytes())?; // flags
    writer.write_all(&(HEADER_SIZE as u16).to_le_bytes())?; // ehsize
    writer.write_all(&(PROGRAM_HEADER_SIZE as u16).to_le_bytes())?;
    writer.write_all(&(PROGRAM_HEADER_COUNT as u16).to_le_bytes())?;
    writer.write_all(&0x28u16.to_le_bytes())?; // size of a section header table entry
    writer.write_all(&0u16.to_le_bytes())?; // number of section headers
    writer.write_all(&0u16.to_le_bytes())?; // section name string table index
    Ok(())
}

fn write_program_header<W: Write + ?Sized>(
    writer: &mut W,
    stype: SegmentType,
    offset: u32,
    addr: u32,
    size: u32,
    flags: u32,
) -> Result<(), W::Error> {
    writer.write_all(&(stype as u32).to_le_bytes())?; // type
    writer.write_all(&offset.to_le_bytes())?; // offset in file
    writer.write_all(&addr.to_le_bytes())?; // vaddr
    writer.write_all(&addr.to_le_bytes())?; // paddr
    writer.write_all(&size.to_le_bytes())?; // file size
    writer.write_all(&size.to_le_bytes())?; // memory size
    writer.write_all(&flags.to_le_bytes())?; // flags
    writer.write_all(&0u32.to_le_bytes())?; // align
    Ok(())
}

/// A destination for snapshots.
pub trait SnapshotTarget {
    /// Stores `snapshot`. Progress and failures are reported through `out`.
    fn persist(&mut self, snapshot: &Snapshot<'_>, out: &mut dyn RawSink);
}

const BYTES_PER_LINE: usize = 32;

/// Prints snapshots through the output sink, as hex between two banners.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportSnapshot;

struct HexWriter<'a> {
    out: &'a mut dyn RawSink,
    column: usize,
}

impl embedded_io::ErrorType for HexWriter<'_> {
    type Error = core::convert::Infallible;
}

impl Write for HexWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &byte in buf {
            self.out.put_hex8(byte);
            self.column += 1;
            if self.column == BYTES_PER_LINE {
                self.out.put_str("\r\n");
                self.column = 0;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SnapshotTarget for TransportSnapshot {
    fn persist(&mut self, snapshot: &Snapshot<'_>, out: &mut dyn RawSink) {
        out.put_str("================= CORE DUMP START =================\r\n");

        let mut writer = HexWriter { out, column: 0 };
        let Ok(()) = snapshot.write_elf(&mut writer);
        if writer.column != 0 {
            writer.out.put_str("\r\n");
        }

        writer
            .out
            .put_str("================= CORE DUMP END =================\r\n");
    }
}

const STORAGE_CHUNK: usize = 256;

struct StorageWriter<'a, S: embedded_storage::Storage> {
    storage: &'a mut S,
    offset: u32,
    buffer: [u8; STORAGE_CHUNK],
    len: usize,
}

impl<S: embedded_storage::Storage> embedded_io::ErrorType for StorageWriter<'_, S> {
    type Error = Error;
}

impl<S: embedded_storage::Storage> Write for StorageWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(STORAGE_CHUNK - self.len);
        self.buffer[self.len..][..n].copy_from_slice(&buf[..n]);
        self.len += n;
        if self.len == STORAGE_CHUNK {
            self.flush()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.len == 0 {
            return Ok(());
        }

        self.storage
            .write(self.offset, &self.buffer[..self.len])
            .map_err(|_| Error::Storage)?;
        self.offset += self.len as u32;
        self.len = 0;
        Ok(())
    }
}

/// Writes snapshots to storage at a fixed offset:
///
/// ```text
/// [0xDEADBEEF][total length][ELF file][0xACDCFEED]
/// ```
///
/// All words are little endian, the total length counts all four parts.
/// The start magic is written last: a write that fails part way leaves no
/// snapshot behind, not even a previously stored one.
pub struct StorageSnapshot<S> {
    storage: S,
    offset: u32,
}

impl<S: embedded_storage::Storage> StorageSnapshot<S> {
    /// Creates a target writing to `storage` at `offset`.
    pub fn new(storage: S, offset: u32) -> Self {
        Self { storage, offset }
    }

    /// Writes `snapshot` and returns the number of bytes stored.
    pub fn write(&mut self, snapshot: &Snapshot<'_>) -> Result<u32, Error> {
        let total_len = 3 * 4 + snapshot.elf_len();

        let mut writer = StorageWriter {
            storage: &mut self.storage,
            offset: self.offset,
            buffer: [0; STORAGE_CHUNK],
            len: 0,
        };
        // invalidates whatever was stored before
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&total_len.to_le_bytes())?;
        snapshot.write_elf(&mut writer)?;
        writer.write_all(&STORAGE_MAGIC_END.to_le_bytes())?;
        writer.flush()?;

        self.storage
            .write(self.offset, &STORAGE_MAGIC_START.to_le_bytes())
            .map_err(|_| Error::Storage)?;

        Ok(total_len)
    }

    /// Returns the length recorded by the last [`write`](Self::write), or
    /// `None` if no complete snapshot is stored.
    pub fn stored_len(&mut self) -> Result<Option<u32>, Error> {
        let mut header = [0u8; 8];
        self.storage
            .read(self.offset, &mut header)
            .map_err(|_| Error::Storage)?;

        let [m0, m1, m2, m3, l0, l1, l2, l3] = header;
        if u32::from_le_bytes([m0, m1, m2, m3]) != STORAGE_MAGIC_START {
            return Ok(None);
        }

        let len = u32::from_le_bytes([l0, l1, l2, l3]);
        if len < 12 {
            return Ok(None);
        }
        let Some(end) = self.offset.checked_add(len - 4) else {
            return Ok(None);
        };

        let mut trailer = [0u8; 4];
        self.storage
            .read(end, &mut trailer)
            .map_err(|_| Error::Storage)?;
        if u32::from_le_bytes(trailer) != STORAGE_MAGIC_END {
            return Ok(None);
        }

        Ok(Some(len))
    }

    /// Returns the underlying storage.
    pub fn into_inner(self) -> S {
        self.storage
    }
}

impl<S: embedded_storage::Storage> SnapshotTarget for StorageSnapshot<S> {
    fn persist(&mut self, snapshot: &Snapshot<'_>, out: &mut dyn RawSink) {
        match self.write(snapshot) {
            Ok(_) => out.put_str("Core dump written to storage.\r\n"),
            Err(_) => out.put_str("Core dump could not be written to storage.\r\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{platform::mock::MockPlatform, sink::capture::CaptureSink};

    const SP: u32 = 0x3ffb_1000;

    struct MockFlash {
        data: [u8; 0x2000],
        // writes accepted before the flash starts failing
        writes_left: usize,
    }

    impl MockFlash {
        fn new(writes_left: usize) -> Self {
            Self {
                data: [0xff; 0x2000],
                writes_left,
            }
        }
    }

    impl embedded_storage::Storage for MockFlash {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            if self.writes_left == 0 {
                return Err(Error::Storage);
            }
            self.writes_left -= 1;
            self.data[offset as usize..][..bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    impl embedded_storage::ReadStorage for MockFlash {
        type Error = Error;
        fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
            let data = self
                .data
                .get(offset as usize..)
                .and_then(|data| data.get(..buffer.len()))
                .ok_or(Error::Storage)?;
            buffer.copy_from_slice(data);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    #[derive(Default)]
    struct Collect(Vec<u8>);

    impl embedded_io::ErrorType for Collect {
        type Error = core::convert::Infallible;
    }

    impl Write for Collect {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn word(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..][..4].try_into().unwrap())
    }

    fn frame() -> ExceptionFrame {
        ExceptionFrame {
            PC: 0x400d_1234,
            PS: 0x0006_0030,
            A0: 0x800d_2000,
            A1: SP,
            A15: 0xf00f,
            SAR: 7,
            ..ExceptionFrame::new()
        }
    }

    fn platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        for i in 0..4 {
            platform.poke(SP + i * 4, 0x1111_1111 * (i + 1));
        }
        platform
    }

    #[test]
    fn stack_window_is_clipped() {
        let platform = platform();
        let layout = StackLayout::ESP32;

        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &layout, 16);
        assert_eq!(snapshot.stack(), SP..SP + 16);

        let top = ExceptionFrame {
            A1: 0x3fff_fff0,
            ..frame
        };
        let snapshot = Snapshot::new(&top, CoreId::ProCpu, &platform, &layout, 1024);
        assert_eq!(snapshot.stack(), 0x3fff_fff0..0x4000_0000);

        let corrupt = ExceptionFrame { A1: 0x13, ..frame };
        let snapshot = Snapshot::new(&corrupt, CoreId::ProCpu, &platform, &layout, 1024);
        assert!(snapshot.stack().is_empty());
    }

    #[test]
    fn elf_layout() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::AppCpu, &platform, &StackLayout::ESP32, 16);

        let mut out = Collect::default();
        snapshot.write_elf(&mut out).unwrap();
        let elf = out.0;

        assert_eq!(elf.len() as u32, snapshot.elf_len());
        assert_eq!(elf.len(), 0x74 + 16 + 20 + 588);
        assert_eq!(&elf[..4], b"\x7fELF");
        assert_eq!(&elf[16..20], &[0x04, 0x00, 0x5e, 0x00]);

        // PT_LOAD
        assert_eq!(word(&elf, 0x34), 1);
        assert_eq!(word(&elf, 0x38), 0x74);
        assert_eq!(word(&elf, 0x3c), SP);
        assert_eq!(word(&elf, 0x44), 16);
        assert_eq!(word(&elf, 0x4c), 6);
        // PT_NOTE
        assert_eq!(word(&elf, 0x54), 4);
        assert_eq!(word(&elf, 0x58), 0x74 + 16);
        assert_eq!(word(&elf, 0x64), 20 + 588);
        assert_eq!(word(&elf, 0x6c), 6);

        // stack contents
        assert_eq!(word(&elf, 0x74), 0x1111_1111);
        assert_eq!(word(&elf, 0x80), 0x4444_4444);

        let note = &elf[0x74 + 16..];
        assert_eq!(&note[12..16], b"CORE");
        let desc = &note[20..];
        assert_eq!(word(desc, 24), 1); // pr_pid
        let regs = &desc[72..];
        assert_eq!(word(regs, 0), 0x400d_1234);
        assert_eq!(word(regs, 4), 0x0006_0030);
        assert_eq!(word(regs, 20), 7);
        assert_eq!(word(regs, 24), 1);
        assert_eq!(word(regs, 64 * 4), 0x800d_2000);
        assert_eq!(word(regs, 65 * 4), SP);
        assert_eq!(word(regs, 79 * 4), 0xf00f);
    }

    #[test]
    fn transport_prints_hex_between_banners() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &StackLayout::ESP32, 16);
        let mut sink = CaptureSink::new();

        TransportSnapshot.persist(&snapshot, &mut sink);

        let lines = sink.lines();
        assert_eq!(lines[0], "================= CORE DUMP START =================");
        assert!(lines[1].starts_with("7f454c46010101"));
        assert!(lines[1..lines.len() - 2].iter().all(|l| l.len() <= 64));

        let hex: String = lines[1..lines.len() - 2].concat();
        assert_eq!(hex.len() as u32, 2 * snapshot.elf_len());
        assert_eq!(
            lines[lines.len() - 2],
            "================= CORE DUMP END ================="
        );
        assert_eq!(lines[lines.len() - 1], "");
    }

    #[test]
    fn storage_roundtrip() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &StackLayout::ESP32, 16);

        let mut target = StorageSnapshot::new(MockFlash::new(usize::MAX), 0x100);
        assert_eq!(target.stored_len(), Ok(None));

        let len = target.write(&snapshot).unwrap();
        assert_eq!(len, 12 + snapshot.elf_len());
        assert_eq!(target.stored_len(), Ok(Some(len)));

        let flash = target.into_inner();
        let stored = &flash.data[0x100..];
        assert_eq!(word(stored, 0), STORAGE_MAGIC_START);
        assert_eq!(&stored[8..12], b"\x7fELF");
        assert_eq!(word(stored, len as usize - 4), STORAGE_MAGIC_END);
        assert_eq!(stored[len as usize], 0xff);
        assert_eq!(flash.data[0xff], 0xff);
    }

    #[test]
    fn storage_failure_is_reported() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &StackLayout::ESP32, 16);
        let mut target = StorageSnapshot::new(MockFlash::new(0), 0);
        let mut sink = CaptureSink::new();

        target.persist(&snapshot, &mut sink);

        assert_eq!(sink.out, "Core dump could not be written to storage.\r\n");
    }

    #[test]
    fn interrupted_write_leaves_no_snapshot() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &StackLayout::ESP32, 16);

        // the first chunk lands, the second one fails
        let mut target = StorageSnapshot::new(MockFlash::new(1), 0);
        assert_eq!(target.write(&snapshot), Err(Error::Storage));
        assert_eq!(target.stored_len(), Ok(None));

        let flash = target.into_inner();
        assert_eq!(flash.writes_left, 0);
        assert_eq!(word(&flash.data, 4), 12 + snapshot.elf_len());
    }

    #[test]
    fn interrupted_write_invalidates_the_previous_snapshot() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &StackLayout::ESP32, 16);

        let mut target = StorageSnapshot::new(MockFlash::new(usize::MAX), 0);
        let len = target.write(&snapshot).unwrap();
        assert_eq!(target.stored_len(), Ok(Some(len)));

        let mut flash = target.into_inner();
        flash.writes_left = 1;
        let mut target = StorageSnapshot::new(flash, 0);
        assert_eq!(target.write(&snapshot), Err(Error::Storage));
        assert_eq!(target.stored_len(), Ok(None));
    }

    #[test]
    fn missing_end_magic_is_not_a_snapshot() {
        let platform = platform();
        let frame = frame();
        let snapshot = Snapshot::new(&frame, CoreId::ProCpu, &platform, &StackLayout::ESP32, 16);

        let mut target = StorageSnapshot::new(MockFlash::new(usize::MAX), 0);
        let len = target.write(&snapshot).unwrap();

        let mut flash = target.into_inner();
        flash.data[len as usize - 1] = 0;
        let mut target = StorageSnapshot::new(flash, 0);
        assert_eq!(target.stored_len(), Ok(None));

        // a length pointing past the end of the storage
        let mut flash = target.into_inner();
        flash.data[4..8].copy_from_slice(&0x10_0000u32.to_le_bytes());
        let mut target = StorageSnapshot::new(flash, 0);
        assert_eq!(target.stored_len(), Err(Error::Storage));
    }
}
