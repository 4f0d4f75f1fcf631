// Low-level driver routines for 16550a UART.
// see http://byterunner.com/16550.html

use crate::memlayout::UART0;
use crate::proc::{CPUS, PROCS};
use crate::spinlock::Mutex;
use core::ptr;

// the UART control registers are memory-mapped at address UART0.
// this function returns the address of one of the registers.
fn reg(offset: usize) -> *mut u8 {
    (UART0 + offset) as *mut u8
}

const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const IER: usize = 1; // interrupt enable register
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
const FCR: usize = 2; // FIFO control register
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const ISR: usize = 2; // interrupt status register
const LCR: usize = 3; // line control register
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR: usize = 5; // line status register
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

fn read_reg(offset: usize) -> u8 {
    unsafe { ptr::read_volatile(reg(offset)) }
}

fn write_reg(offset: usize, v: u8) {
    unsafe { ptr::write_volatile(reg(offset), v) }
}

const TX_BUF_SIZE: usize = 32;

struct TxBuf {
    buf: [u8; TX_BUF_SIZE],
    w: usize, // write next to buf[w % TX_BUF_SIZE]
    r: usize, // read next from buf[r % TX_BUF_SIZE]
}

impl TxBuf {
    const fn new() -> Self {
        Self {
            buf: [0; TX_BUF_SIZE],
            w: 0,
            r: 0,
        }
    }
}

pub struct Uart {
    tx: Mutex<TxBuf>,
}

pub static UART: Uart = Uart::new();

impl Uart {
    const fn new() -> Self {
        Self {
            tx: Mutex::new(TxBuf::new(), "uart"),
        }
    }

    // add a character to the output buffer and tell the uart to start
    // sending if it isn't already. blocks if the output buffer is
    // full. since it may block, it can't be called from interrupt
    // context - only from write().
    pub fn putc(&self, c: u8) {
        let mut tx = self.tx.lock();
        loop {
            if tx.w == tx.r + TX_BUF_SIZE {
                // buffer is full; wait for start() to open up space.
                let p = CPUS.my_proc().unwrap();
                tx = p.sleep(&tx.r as *const _ as usize, tx);
            } else {
                let w = tx.w;
                tx.buf[w % TX_BUF_SIZE] = c;
                tx.w += 1;
                self.start(tx);
                return;
            }
        }
    }

    // if the uart is idle, and a character is waiting in the
    // transmit buffer, send it. caller must hold self.tx. called from
    // both putc() and the interrupt handler.
    fn start(&self, mut tx: crate::spinlock::MutexGuard<'_, TxBuf>) {
        loop {
            if tx.w == tx.r {
                return; // transmit buffer is empty.
            }
            if read_reg(LSR) & LSR_TX_IDLE == 0 {
                // the THR is still full; it will interrupt when ready
                // for another byte.
                return;
            }
            let c = tx.buf[tx.r % TX_BUF_SIZE];
            tx.r += 1;

            // putc() may be waiting for space in the buffer.
            PROCS.wakeup(&tx.r as *const _ as usize);

            write_reg(THR, c);
        }
    }

    // handle a uart interrupt, raised because input has arrived, or
    // the uart is ready for more output, or both. called from
    // devintr() in trap.rs.
    pub fn intr(&self) {
        // read and process incoming characters.
        while let Some(c) = getc() {
            crate::console::CONS.intr(c);
        }

        // send buffered characters.
        self.start(self.tx.lock());
    }
}

pub unsafe fn init() {
    // disable interrupts.
    write_reg(IER, 0x00);

    // special mode to set baud rate.
    write_reg(LCR, LCR_BAUD_LATCH);

    // LSB for baud rate of 38.4K.
    write_reg(0, 0x03);
    // MSB for baud rate of 38.4K.
    write_reg(1, 0x00);

    // leave set-baud mode, and set word length to 8 bits, no parity.
    write_reg(LCR, LCR_EIGHT_BITS);

    // reset and enable FIFOs.
    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

    // enable transmit and receive interrupts.
    write_reg(IER, IER_TX_ENABLE | IER_RX_ENABLE);
}

// alternate version of putc() that doesn't use interrupts or block on
// the output buffer, for use by printf() and to echo input
// characters. spins waiting for the uart's output register to be
// empty.
pub fn putc_sync(c: u8) {
    while read_reg(LSR) & LSR_TX_IDLE == 0 {}
    write_reg(THR, c);
}

// read one input character from the uart. returns None if none is
// waiting.
fn getc() -> Option<u8> {
    if read_reg(LSR) & LSR_RX_READY != 0 {
        Some(read_reg(RHR))
    } else {
        None
    }
}
