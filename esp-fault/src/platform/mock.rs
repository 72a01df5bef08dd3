use std::collections::BTreeMap;

use super::{MemoryAccess, Platform, SpecialRegister};
use crate::cpu::CoreId;

/// Side effects recorded by [`MockPlatform`], in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Write(u32, u32),
    Special(SpecialRegister, u32),
    Stall(CoreId),
    DebugBreak,
    Delay(u32),
    Reset,
    Halt,
    Trap,
}

pub struct MockPlatform {
    pub core: CoreId,
    pub memory: BTreeMap<u32, u32>,
    pub special: BTreeMap<SpecialRegister, u32>,
    pub attached: bool,
    pub events: Vec<Event>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            core: CoreId::ProCpu,
            memory: BTreeMap::new(),
            special: BTreeMap::new(),
            attached: false,
            events: Vec::new(),
        }
    }

    /// Stores a word without recording an event.
    pub fn poke(&mut self, address: u32, value: u32) {
        self.memory.insert(address, value);
    }

    pub fn special(&self, register: SpecialRegister) -> u32 {
        self.special.get(&register).copied().unwrap_or(0)
    }

    pub fn count(&self, event: Event) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }

    pub fn position(&self, event: Event) -> Option<usize> {
        self.events.iter().position(|e| *e == event)
    }

    pub fn writes(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.events.iter().filter_map(|e| match e {
            Event::Write(address, value) => Some((*address, *value)),
            _ => None,
        })
    }

    pub fn special_writes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Special(..)))
            .count()
    }

    pub fn total_delay_us(&self) -> u64 {
        self.events
            .iter()
            .map(|e| match e {
                Event::Delay(us) => *us as u64,
                _ => 0,
            })
            .sum()
    }
}

impl MemoryAccess for MockPlatform {
    fn read_word(&self, address: u32) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }
}

impl Platform for MockPlatform {
    fn current_core(&self) -> CoreId {
        self.core
    }

    fn read_special(&self, register: SpecialRegister) -> u32 {
        self.special(register)
    }

    fn write_special(&mut self, register: SpecialRegister, value: u32) {
        self.special.insert(register, value);
        self.events.push(Event::Special(register, value));
    }

    fn write_word(&mut self, address: u32, value: u32) {
        self.memory.insert(address, value);
        self.events.push(Event::Write(address, value));
    }

    fn stall_core(&mut self, core: CoreId) {
        self.events.push(Event::Stall(core));
    }

    fn debugger_attached(&self) -> bool {
        self.attached
    }

    fn debug_break(&mut self) {
        self.events.push(Event::DebugBreak);
    }

    fn delay_us(&mut self, us: u32) {
        self.events.push(Event::Delay(us));
    }

    fn software_reset(&mut self) {
        self.events.push(Event::Reset);
    }

    fn halt(&mut self) {
        self.events.push(Event::Halt);
    }

    fn trap(&mut self) {
        self.events.push(Event::Trap);
    }
}
