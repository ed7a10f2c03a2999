use crate::{
    console::{Console, LineReader},
    error::Fault,
    fs::FileTable,
    memory::GuestMemory,
    vm::MemoryLayout,
};

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// `exit`, `exit_group`, or a return from the entry point.
    Exited(i32),
    /// The program did something outside the emulated contract.
    Aborted(Fault),
}

impl RunOutcome {
    /// Host process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Exited(code) => *code,
            RunOutcome::Aborted(_) => 1,
        }
    }
}

/// Everything one loaded program can reach through its syscalls. Built by the loader, alive
/// for exactly one run.
pub struct Session<'a> {
    pub(crate) memory: GuestMemory,
    pub(crate) layout: MemoryLayout,
    pub(crate) files: FileTable<'a>,
    pub(crate) console: &'a mut dyn Console,
    pub(crate) input: LineReader,
    pub(crate) outcome: Option<RunOutcome>,
}

impl<'a> Session<'a> {
    pub fn new(
        memory: GuestMemory,
        layout: MemoryLayout,
        files: FileTable<'a>,
        console: &'a mut dyn Console,
    ) -> Self {
        Session {
            memory,
            layout,
            files,
            console,
            input: LineReader::default(),
            outcome: None,
        }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Closes whatever the program left open. Memory goes when the session is dropped.
    pub fn finish(mut self) {
        self.files.close_all();
    }
}
