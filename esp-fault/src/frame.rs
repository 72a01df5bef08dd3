//! Exception frame

/// Number of registers printed in a register dump.
pub const REGISTER_COUNT: usize = 24;

/// Register names in dump order, padded to a common width.
pub(crate) const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "PC      ", "PS      ", "A0      ", "A1      ", "A2      ", "A3      ", "A4      ", "A5      ",
    "A6      ", "A7      ", "A8      ", "A9      ", "A10     ", "A11     ", "A12     ", "A13     ",
    "A14     ", "A15     ", "SAR     ", "EXCCAUSE", "EXCVADDR", "LBEG    ", "LEND    ", "LCOUNT  ",
];

/// State of the faulting CPU, captured by the trap entry code.
///
/// The layout matches the leading words of the frame saved by the
/// `xtensa-lx-rt` exception vectors, so a pointer to a saved context can be
/// reinterpreted as a frame. The fault handler only ever reads it.
#[repr(C)]
#[allow(non_snake_case, missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExceptionFrame {
    pub PC: u32,
    pub PS: u32,

    pub A0: u32,
    pub A1: u32,
    pub A2: u32,
    pub A3: u32,
    pub A4: u32,
    pub A5: u32,
    pub A6: u32,
    pub A7: u32,
    pub A8: u32,
    pub A9: u32,
    pub A10: u32,
    pub A11: u32,
    pub A12: u32,
    pub A13: u32,
    pub A14: u32,
    pub A15: u32,
    pub SAR: u32,
    pub EXCCAUSE: u32,
    pub EXCVADDR: u32,
    pub LBEG: u32,
    pub LEND: u32,
    pub LCOUNT: u32,
}

impl ExceptionFrame {
    /// Creates a new, zeroed out frame.
    pub const fn new() -> Self {
        Self {
            PC: 0,
            PS: 0,
            A0: 0,
            A1: 0,
            A2: 0,
            A3: 0,
            A4: 0,
            A5: 0,
            A6: 0,
            A7: 0,
            A8: 0,
            A9: 0,
            A10: 0,
            A11: 0,
            A12: 0,
            A13: 0,
            A14: 0,
            A15: 0,
            SAR: 0,
            EXCCAUSE: 0,
            EXCVADDR: 0,
            LBEG: 0,
            LEND: 0,
            LCOUNT: 0,
        }
    }

    /// Program counter at the time of the fault.
    pub fn pc(&self) -> u32 {
        self.PC
    }

    /// Stack pointer of the faulting frame (`a1` in the windowed ABI).
    pub fn sp(&self) -> u32 {
        self.A1
    }

    /// Raw `EXCCAUSE` value, or the panic reason code on the panic path.
    pub fn cause(&self) -> u32 {
        self.EXCCAUSE
    }

    /// Faulting data address for memory faults.
    pub fn fault_address(&self) -> u32 {
        self.EXCVADDR
    }

    /// The address register file `a0..a15`.
    pub fn address_registers(&self) -> [u32; 16] {
        [
            self.A0, self.A1, self.A2, self.A3, self.A4, self.A5, self.A6, self.A7, self.A8,
            self.A9, self.A10, self.A11, self.A12, self.A13, self.A14, self.A15,
        ]
    }

    /// All registers, in the order of [`REGISTER_NAMES`].
    pub fn registers(&self) -> [u32; REGISTER_COUNT] {
        let a = self.address_registers();
        [
            self.PC,
            self.PS,
            a[0],
            a[1],
            a[2],
            a[3],
            a[4],
            a[5],
            a[6],
            a[7],
            a[8],
            a[9],
            a[10],
            a[11],
            a[12],
            a[13],
            a[14],
            a[15],
            self.SAR,
            self.EXCCAUSE,
            self.EXCVADDR,
            self.LBEG,
            self.LEND,
            self.LCOUNT,
        ]
    }
}
