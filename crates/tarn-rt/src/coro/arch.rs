// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-architecture context switching.
//!
//! A [`Context`] holds exactly the callee-saved register set plus the stack
//! pointer and a resume address. `switch` stores the current thread of
//! control into one context and continues from another; `init_context`
//! prepares a fresh context so the first switch into it lands in a
//! trampoline that calls `entry_fn(entry_arg)` on the new stack.
//!
//! Caller-saved registers need no treatment: `switch` is an `extern "C"`
//! call boundary, so the compiler has already spilled anything live across
//! it.

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("tarn-rt stackful coroutines require x86_64 or aarch64");

#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::{init_context, switch, Context};

#[cfg(target_arch = "aarch64")]
pub(crate) use aarch64::{init_context, switch, Context};

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use std::arch::naked_asm;

    /// Saved execution state, System V AMD64: callee-saved registers plus
    /// rsp and the address execution resumes at. Field order is the asm
    /// offset table; do not reorder.
    #[repr(C)]
    #[derive(Default)]
    pub(crate) struct Context {
        rsp: u64, // 0x00
        rip: u64, // 0x08
        rbx: u64, // 0x10
        rbp: u64, // 0x18
        r12: u64, // 0x20: entry function for a fresh context
        r13: u64, // 0x28: entry argument for a fresh context
        r14: u64, // 0x30
        r15: u64, // 0x38
    }

    /// Prepare `ctx` so the first switch into it runs `entry_fn(entry_arg)`
    /// on the stack ending at `stack_top`.
    ///
    /// # Safety
    /// `stack_top` must be the high end of writable stack memory large
    /// enough for `entry_fn`. `entry_fn` must be an `extern "C"
    /// fn(usize)` that never returns to the trampoline.
    pub(crate) unsafe fn init_context(
        ctx: &mut Context,
        stack_top: *mut u8,
        entry_fn: usize,
        entry_arg: usize,
    ) {
        // 16-byte aligned; the trampoline's `call` then leaves the stack at
        // the alignment the ABI promises a function entry.
        let sp = (stack_top as usize) & !0xF;
        ctx.rsp = sp as u64;
        ctx.rip = entry_trampoline as *const () as usize as u64;
        ctx.rbx = 0;
        ctx.rbp = 0;
        ctx.r12 = entry_fn as u64;
        ctx.r13 = entry_arg as u64;
        ctx.r14 = 0;
        ctx.r15 = 0;
    }

    /// First instruction stream of every fresh context: move the argument
    /// into place and call the entry function. The entry function switches
    /// away and never returns here; `ud2` guards against it doing so.
    #[unsafe(naked)]
    unsafe extern "C" fn entry_trampoline() {
        naked_asm!("mov rdi, r13", "call r12", "ud2");
    }

    /// Save the current thread of control into `save` and continue from
    /// `load`.
    ///
    /// # Safety
    /// `save` must be valid for writes and `load` for reads; `load` must
    /// hold a context produced by `init_context` or a previous save, whose
    /// stack is still live. Both pointers must stay valid for the duration
    /// of the switch.
    #[unsafe(naked)]
    pub(crate) unsafe extern "C" fn switch(_save: *mut Context, _load: *const Context) {
        naked_asm!(
            // Store the outgoing context through rdi.
            "mov [rdi + 0x00], rsp",
            "lea rax, [rip + 1f]",
            "mov [rdi + 0x08], rax",
            "mov [rdi + 0x10], rbx",
            "mov [rdi + 0x18], rbp",
            "mov [rdi + 0x20], r12",
            "mov [rdi + 0x28], r13",
            "mov [rdi + 0x30], r14",
            "mov [rdi + 0x38], r15",
            // Load the incoming context through rsi.
            "mov rsp, [rsi + 0x00]",
            "mov rax, [rsi + 0x08]",
            "mov rbx, [rsi + 0x10]",
            "mov rbp, [rsi + 0x18]",
            "mov r12, [rsi + 0x20]",
            "mov r13, [rsi + 0x28]",
            "mov r14, [rsi + 0x30]",
            "mov r15, [rsi + 0x38]",
            "jmp rax",
            // Re-entry point for the saved context.
            "1:",
            "ret",
        );
    }
}

#[cfg(target_arch = "aarch64")]
mod aarch64 {
    use std::arch::naked_asm;

    /// Saved execution state, AAPCS64: callee-saved general registers,
    /// frame/link registers, the low halves of v8-v15 (callee-saved per the
    /// ABI), sp, and the resume address. Field order is the asm offset
    /// table; do not reorder.
    #[repr(C)]
    #[derive(Default)]
    pub(crate) struct Context {
        sp: u64,  // 0x00
        pc: u64,  // 0x08
        x19: u64, // 0x10: entry function for a fresh context
        x20: u64, // 0x18: entry argument for a fresh context
        x21: u64, // 0x20
        x22: u64, // 0x28
        x23: u64, // 0x30
        x24: u64, // 0x38
        x25: u64, // 0x40
        x26: u64, // 0x48
        x27: u64, // 0x50
        x28: u64, // 0x58
        x29: u64, // 0x60
        x30: u64, // 0x68
        d8: u64,  // 0x70
        d9: u64,  // 0x78
        d10: u64, // 0x80
        d11: u64, // 0x88
        d12: u64, // 0x90
        d13: u64, // 0x98
        d14: u64, // 0xa0
        d15: u64, // 0xa8
    }

    /// Prepare `ctx` so the first switch into it runs `entry_fn(entry_arg)`
    /// on the stack ending at `stack_top`.
    ///
    /// # Safety
    /// Same contract as the x86_64 version: writable stack below
    /// `stack_top`, and an `extern "C" fn(usize)` entry that never returns.
    pub(crate) unsafe fn init_context(
        ctx: &mut Context,
        stack_top: *mut u8,
        entry_fn: usize,
        entry_arg: usize,
    ) {
        // sp must stay 16-byte aligned at all times on aarch64.
        let sp = (stack_top as usize) & !0xF;
        *ctx = Context::default();
        ctx.sp = sp as u64;
        ctx.pc = entry_trampoline as *const () as usize as u64;
        ctx.x19 = entry_fn as u64;
        ctx.x20 = entry_arg as u64;
    }

    /// Fresh-context entry: argument into x0, call the entry function.
    /// `brk` guards against the entry function returning.
    #[unsafe(naked)]
    unsafe extern "C" fn entry_trampoline() {
        naked_asm!("mov x0, x20", "blr x19", "brk #0x1");
    }

    /// Save the current thread of control into `save` (x0) and continue
    /// from `load` (x1).
    ///
    /// # Safety
    /// Same contract as the x86_64 version.
    #[unsafe(naked)]
    pub(crate) unsafe extern "C" fn switch(_save: *mut Context, _load: *const Context) {
        naked_asm!(
            // Store the outgoing context through x0.
            "mov x9, sp",
            "str x9, [x0, #0x00]",
            "adr x9, 1f",
            "str x9, [x0, #0x08]",
            "stp x19, x20, [x0, #0x10]",
            "stp x21, x22, [x0, #0x20]",
            "stp x23, x24, [x0, #0x30]",
            "stp x25, x26, [x0, #0x40]",
            "stp x27, x28, [x0, #0x50]",
            "stp x29, x30, [x0, #0x60]",
            "stp d8, d9, [x0, #0x70]",
            "stp d10, d11, [x0, #0x80]",
            "stp d12, d13, [x0, #0x90]",
            "stp d14, d15, [x0, #0xa0]",
            // Load the incoming context through x1.
            "ldp x19, x20, [x1, #0x10]",
            "ldp x21, x22, [x1, #0x20]",
            "ldp x23, x24, [x1, #0x30]",
            "ldp x25, x26, [x1, #0x40]",
            "ldp x27, x28, [x1, #0x50]",
            "ldp x29, x30, [x1, #0x60]",
            "ldp d8, d9, [x1, #0x70]",
            "ldp d10, d11, [x1, #0x80]",
            "ldp d12, d13, [x1, #0x90]",
            "ldp d14, d15, [x1, #0xa0]",
            "ldr x9, [x1, #0x00]",
            "mov sp, x9",
            "ldr x9, [x1, #0x08]",
            "br x9",
            // Re-entry point for the saved context.
            "1:",
            "ret",
        );
    }
}
