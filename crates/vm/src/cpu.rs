use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use svm_arch::Opcode;
use tracing::debug;

use crate::device::{Device, DeviceId, DeviceMap, IntSender};
use crate::error::VmError;
use crate::instruction::Instruction;
use crate::memory::{Memory, R0, RIA, RIP, RSP, RST, USER_MEM};

/// Capacity of the CPU interrupt queue. Enqueues beyond it are dropped.
pub const INT_QUEUE_CAPACITY: usize = 32;

/// Callback handler for debug trace output, invoked with each decoded
/// instruction before it executes.
pub type TraceFn = Box<dyn FnMut(&Instruction) + Send>;

/// Outcome of a single execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    /// The program executed `HALT`.
    Halted,
}

/// The SVM runtime: a memory bank, a device table and an instruction
/// dispatch loop. Runs as `startup` → `step`* → `shutdown`.
pub struct Cpu {
    devices: DeviceMap,
    memory: Memory,
    rng: StdRng,
    int_rx: crossbeam_channel::Receiver<u16>,
    int_tx: crossbeam_channel::Sender<u16>,
    trace: Option<TraceFn>,
    running: bool,
    in_int_handler: bool,
}

impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}

impl Cpu {
    pub fn new() -> Cpu {
        let (int_tx, int_rx) = crossbeam_channel::bounded(INT_QUEUE_CAPACITY);
        Cpu {
            devices: DeviceMap::default(),
            memory: Memory::new(),
            rng: StdRng::seed_from_u64(wall_clock_seed()),
            int_rx,
            int_tx,
            trace: None,
            running: false,
            in_int_handler: false,
        }
    }

    /// Installs a debug trace handler.
    pub fn with_trace(trace: TraceFn) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.trace = Some(trace);
        cpu
    }

    /// The CPU's own device id.
    pub fn id(&self) -> DeviceId {
        DeviceId::new(0xfffe, 0x0001)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Connects a hardware peripheral. Returns false if a device with the
    /// same id is already connected.
    pub fn connect(&mut self, device: Box<dyn Device>) -> bool {
        self.devices.connect(device)
    }

    /// Initializes the CPU and its connected peripherals: memory is
    /// cleared, execution restarts at address zero and the callstack is
    /// placed at the top of user space.
    pub fn startup(&mut self) -> Result<(), VmError> {
        if self.running {
            return Err(VmError::AlreadyRunning);
        }
        self.running = true;

        debug!(cpu = %self.id(), "startup");
        self.memory.reset();
        self.memory.set_u16(RIP as i64, 0);
        self.memory.set_u16(RSP as i64, (USER_MEM - 2) as i64);
        self.memory.set_u8(RST as i64, 0);
        self.in_int_handler = false;

        // Drain messages left over from a previous session.
        while self.int_rx.try_recv().is_ok() {}

        self.devices.startup(&IntSender::new(self.int_tx.clone()))
    }

    /// Shuts down connected peripherals, in insertion order.
    pub fn shutdown(&mut self) -> Result<(), VmError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        debug!(cpu = %self.id(), "shutdown");
        self.devices.shutdown()
    }

    /// Copies a program into memory at address zero.
    pub fn load(&mut self, program: &[u8]) {
        self.memory.write(0, program);
    }

    /// Performs a single execution step: delivers at most one pending
    /// device interrupt, then decodes and executes one instruction.
    pub fn step(&mut self) -> Result<Status, VmError> {
        if !self.running {
            return Ok(Status::Halted);
        }

        self.check_int_queue();

        let instr = Instruction::decode(&mut self.memory)?;
        if let Some(trace) = &mut self.trace {
            trace(&instr);
        }
        self.execute(&instr)
    }

    /// Runs until the program halts or faults, with a step budget to keep
    /// runaway programs finite.
    pub fn run(&mut self, max_steps: usize) -> Result<Status, VmError> {
        for _ in 0..max_steps {
            if self.step()? == Status::Halted {
                return Ok(Status::Halted);
            }
        }
        Ok(Status::Running)
    }

    fn execute(&mut self, instr: &Instruction) -> Result<Status, VmError> {
        let mem = &mut self.memory;
        let args = &instr.args;

        match instr.opcode {
            Opcode::Nop => {}
            Opcode::Halt => return Ok(Status::Halted),

            Opcode::Mov => {
                mem.set_typed(args[0].type_desc, args[0].address, args[1].value);
            }

            Opcode::Push => {
                push(mem, args[0].value);
            }
            Opcode::Pop => {
                let value = pop(mem);
                mem.set_typed(args[0].type_desc, args[0].address, value);
            }

            Opcode::Rng => {
                let lo = args[1].value;
                let hi = args[2].value;
                if hi < lo {
                    mem.set_overflow(true);
                } else {
                    mem.set_overflow(false);
                    let value = if hi == lo {
                        lo
                    } else {
                        lo + self.rng.gen_range(0..hi - lo)
                    };
                    mem.set_typed(args[0].type_desc, args[0].address, value);
                }
            }
            Opcode::Seed => {
                self.rng = StdRng::seed_from_u64(args[0].value as u64);
            }

            Opcode::Add => {
                arithmetic(mem, args, |a, b| a.wrapping_add(b));
            }
            Opcode::Sub => {
                arithmetic(mem, args, |a, b| a.wrapping_sub(b));
            }
            Opcode::Mul => {
                arithmetic(mem, args, |a, b| a.wrapping_mul(b));
            }
            Opcode::Pow => {
                arithmetic(mem, args, |a, b| (a as f64).powf(b as f64) as i64);
            }
            Opcode::Div => {
                division(mem, args, |a, b| a.wrapping_div(b));
            }
            Opcode::Mod => {
                division(mem, args, |a, b| a.wrapping_rem(b));
            }

            Opcode::Shl => {
                let value = shift_left(args[1].value, args[2].value);
                mem.set_typed(args[0].type_desc, args[0].address, value);
            }
            Opcode::Shr => {
                let value = shift_right(args[1].value, args[2].value);
                mem.set_typed(args[0].type_desc, args[0].address, value);
            }
            Opcode::And => {
                mem.set_typed(args[0].type_desc, args[0].address, args[1].value & args[2].value);
            }
            Opcode::Or => {
                mem.set_typed(args[0].type_desc, args[0].address, args[1].value | args[2].value);
            }
            Opcode::Xor => {
                mem.set_typed(args[0].type_desc, args[0].address, args[1].value ^ args[2].value);
            }
            Opcode::Abs => {
                mem.set_typed(args[0].type_desc, args[0].address, args[1].value.wrapping_abs());
            }

            Opcode::Ceq => mem.set_compare(args[0].value == args[1].value),
            Opcode::Cne => mem.set_compare(args[0].value != args[1].value),
            Opcode::Cgt => mem.set_compare(args[0].value > args[1].value),
            Opcode::Cge => mem.set_compare(args[0].value >= args[1].value),
            Opcode::Clt => mem.set_compare(args[0].value < args[1].value),
            Opcode::Cle => mem.set_compare(args[0].value <= args[1].value),

            Opcode::Jmp => mem.set_u16(RIP as i64, args[0].value),
            Opcode::Jez => {
                if !mem.compare() {
                    mem.set_u16(RIP as i64, args[0].value);
                }
            }
            Opcode::Jnz => {
                if mem.compare() {
                    mem.set_u16(RIP as i64, args[0].value);
                }
            }

            Opcode::Call => call(mem, args[0].value),
            Opcode::Clez => {
                if !mem.compare() {
                    call(mem, args[0].value);
                }
            }
            Opcode::Clnz => {
                if mem.compare() {
                    call(mem, args[0].value);
                }
            }
            Opcode::Ret => {
                let rip = pop(mem);
                mem.set_u16(RIP as i64, rip);
            }
            Opcode::Iret => {
                self.in_int_handler = false;
                let r0 = pop(mem);
                mem.set_u16(R0 as i64, r0);
                let rip = pop(mem);
                mem.set_u16(RIP as i64, rip);
            }

            Opcode::Hwa => {
                let id = DeviceId::new(args[1].value, args[2].value);
                match self.devices.find(id) {
                    Some(index) => {
                        mem.set_compare(true);
                        mem.set_typed(args[0].type_desc, args[0].address, index as i64);
                    }
                    None => mem.set_compare(false),
                }
            }
            Opcode::Int => {
                if !self.devices.int(args[0].value, mem) {
                    return Err(VmError::InvalidDeviceIndex {
                        index: args[0].value,
                        address: instr.ip as u16,
                    });
                }
            }

            Opcode::Wait => {
                let ms = args[0].value.max(0) as u64;
                std::thread::sleep(Duration::from_millis(ms));
            }
        }

        Ok(Status::Running)
    }

    /// Delivers one pending interrupt message: the current `RIP` and `R0`
    /// are pushed, the message lands in `R0` and control transfers to the
    /// handler address in `RIA`. While a handler runs, further delivery is
    /// suppressed; a zero `RIA` disables the queue and drops its contents.
    fn check_int_queue(&mut self) {
        if self.in_int_handler {
            return;
        }

        let ria = self.memory.get_u16(RIA as i64);
        if ria == 0 {
            while self.int_rx.try_recv().is_ok() {}
            return;
        }

        if let Ok(message) = self.int_rx.try_recv() {
            let rip = self.memory.get_u16(RIP as i64);
            let r0 = self.memory.get_u16(R0 as i64);
            push(&mut self.memory, rip);
            push(&mut self.memory, r0);

            self.memory.set_u16(R0 as i64, message as i64);
            self.memory.set_u16(RIP as i64, ria);
            self.in_int_handler = true;
        }
    }
}

/// Writes an arithmetic result and sets the overflow flag when the 64-bit
/// result lies outside the destination type's range.
fn arithmetic(mem: &mut Memory, args: &[crate::instruction::Operand; 3], f: impl Fn(i64, i64) -> i64) {
    let result = f(args[1].value, args[2].value);
    let (min, max) = args[0].type_desc.limits();
    mem.set_overflow(result < min || result > max);
    mem.set_typed(args[0].type_desc, args[0].address, result);
}

/// Division-style dispatch: a zero divisor sets the divide-by-zero flag and
/// leaves the destination untouched.
fn division(mem: &mut Memory, args: &[crate::instruction::Operand; 3], f: impl Fn(i64, i64) -> i64) {
    if args[2].value == 0 {
        mem.set_divide_by_zero(true);
        return;
    }
    mem.set_divide_by_zero(false);
    let result = f(args[1].value, args[2].value);
    mem.set_typed(args[0].type_desc, args[0].address, result);
}

/// Pushes a 16-bit value onto the callstack. The value lands at the current
/// `RSP`, which then moves down to the next free slot.
fn push(mem: &mut Memory, value: i64) {
    let rsp = mem.get_u16(RSP as i64);
    mem.set_u16(RSP as i64, rsp - 2);
    mem.set_u16(rsp, value);
}

/// Pops the most recent 16-bit value off the callstack.
fn pop(mem: &mut Memory) -> i64 {
    let rsp = mem.get_u16(RSP as i64);
    mem.set_u16(RSP as i64, rsp + 2);
    mem.get_u16(rsp + 2)
}

fn call(mem: &mut Memory, target: i64) {
    let rip = mem.get_u16(RIP as i64);
    push(mem, rip);
    mem.set_u16(RIP as i64, target);
}

fn shift_left(value: i64, count: i64) -> i64 {
    if !(0..64).contains(&count) {
        return 0;
    }
    value.wrapping_shl(count as u32)
}

fn shift_right(value: i64, count: i64) -> i64 {
    if !(0..64).contains(&count) {
        return value >> 63;
    }
    value.wrapping_shr(count as u32)
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
