//! # Hook
//!
//! Splices a conventionally-called handler in front of an unconventional
//! target. Installing writes a near jump over the target's prologue; the
//! displaced bytes live on in a trampoline so the handler can still reach
//! the original through [`Hook::call_original`].

mod trampoline;
mod wrapper;

use crate::alloc::{allocate_executable, ExecutableMemory};
use crate::call::{Arguments, Function, Output};
use crate::code::{self, Asm, JMP_REL_SIZE};
use crate::error::{Error, Result};
use crate::patch;

pub use wrapper::SCRATCH_WORDS;

/// Everything an initialized hook owns
struct HookState<R, A> {
    /// The hooked target and its declared activation layout
    function: Function<R, A>,
    /// Number of prologue bytes the patch displaces
    displaced_len: usize,
    /// Callable copy of the displaced prologue
    trampoline: ExecutableMemory,
    /// Generated stub bridging the unconventional activation to the handler
    #[allow(unused)]
    wrapper: ExecutableMemory,
    /// Scratch words the wrapper addresses absolutely; boxed so the address
    /// stays stable however the hook itself moves
    #[allow(unused)]
    scratch: Box<[u32; SCRATCH_WORDS]>,
    /// Whether the jump patch is currently written over the prologue
    installed: bool,
}

/// A jump-patch hook over an unconventionally-called function.
///
/// A default-constructed hook owns nothing and fails every operation with
/// [`Error::NotInitialized`]; build a real one with [`Hook::new`] or
/// [`Hook::with_scanned_prologue`].
pub struct Hook<R, A> {
    /// Present once the hook has been built over a target
    state: Option<HookState<R, A>>,
}

impl<R, A> Default for Hook<R, A> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<R: Output, A: Arguments> Hook<R, A> {
    /// Builds a hook over `function`, bridging to the cdecl handler at
    /// `handler`. `displaced_len` is the number of prologue bytes the
    /// 5-byte jump patch displaces, counted to an instruction boundary.
    ///
    /// The hook is constructed uninstalled.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when `displaced_len` is smaller than the
    /// jump patch; [`Error::Unsupported`] when the signature has no wrapper
    /// encoding; [`Error::WrapperOverflow`] when the generated wrapper does
    /// not fit its allocation.
    ///
    /// # Safety
    ///
    /// The target's first `displaced_len` bytes must be whole instructions
    /// free of PC-relative operands, and `handler` must be a cdecl function
    /// taking `A`'s values in declaration order and returning `R`.
    pub unsafe fn new(
        function: Function<R, A>,
        handler: usize,
        displaced_len: usize,
    ) -> Result<Self> {
        if displaced_len < JMP_REL_SIZE {
            return Err(Error::InvalidArgument(
                "displaced prologue is shorter than the jump patch",
            ));
        }

        let scratch = Box::new([0u32; SCRATCH_WORDS]);

        // Safety: caller guarantees the prologue bytes
        let trampoline = unsafe { trampoline::build(function.address(), displaced_len) }?;

        let mut wrapper_memory = allocate_executable(wrapper::CAPACITY)?;
        let bytes = wrapper::emit(
            wrapper_memory.address(),
            function.signature(),
            handler,
            scratch.as_ptr() as usize,
            R::IS_FLOAT,
        )?;
        wrapper_memory[..bytes.len()].copy_from_slice(&bytes);

        Ok(Self {
            state: Some(HookState {
                function,
                displaced_len,
                trampoline,
                wrapper: wrapper_memory,
                scratch,
                installed: false,
            }),
        })
    }

    /// [`Hook::new`], with the displaced byte count measured by decoding the
    /// target's prologue instead of supplied by hand.
    ///
    /// # Safety
    ///
    /// As for [`Hook::new`], plus the target must be readable for
    /// [`code::scan::SCAN_WINDOW`] bytes.
    pub unsafe fn with_scanned_prologue(function: Function<R, A>, handler: usize) -> Result<Self> {
        // Safety: caller guarantees the scan window is readable
        let window =
            unsafe { patch::read_code(function.address() as *const u8, code::scan::SCAN_WINDOW) };
        let displaced_len = code::displaced_len(&window, JMP_REL_SIZE)?;
        // Safety: the scan only accepts straight-line instructions
        unsafe { Self::new(function, handler, displaced_len) }
    }

    /// Whether the jump patch is currently installed
    pub fn is_installed(&self) -> bool {
        self.state.as_ref().map(|s| s.installed).unwrap_or(false)
    }

    /// Writes the jump patch over the target's prologue, routing callers
    /// into the wrapper. Idempotent when already installed.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] on a default-constructed hook.
    ///
    /// # Safety
    ///
    /// No other thread may execute the target or its prologue while the
    /// patch is being written.
    pub unsafe fn install(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        if state.installed {
            return Ok(());
        }

        let mut asm = Asm::new(state.function.address());
        asm.jmp(state.wrapper.address());

        // Safety: the target's prologue is valid for the 5 patch bytes
        unsafe {
            patch::write_code(state.function.address() as *mut u8, &asm.finish())?;
        }
        state.installed = true;
        Ok(())
    }

    /// Restores the target's prologue from the trampoline's prefix. A no-op
    /// when not installed.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] on a default-constructed hook.
    ///
    /// # Safety
    ///
    /// As for [`install`](Self::install).
    pub unsafe fn uninstall(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        if !state.installed {
            return Ok(());
        }

        // Safety: the trampoline prefix is the original prologue
        unsafe {
            patch::write_code(
                state.function.address() as *mut u8,
                &state.trampoline[..state.displaced_len],
            )?;
        }
        state.installed = false;
        Ok(())
    }

    /// Calls the original function through the trampoline, bypassing the
    /// installed patch. Intended for use from inside the handler.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] on a default-constructed hook.
    ///
    /// # Safety
    ///
    /// As for [`Function::call`].
    #[cfg(target_arch = "x86")]
    pub unsafe fn call_original(&self, args: A) -> Result<R> {
        let state = self.state.as_ref().ok_or(Error::NotInitialized)?;
        let original = Function::<R, A>::new(
            state.trampoline.address(),
            state.function.signature().clone(),
        )?;
        // Safety: the trampoline carries the original's activation layout
        unsafe { original.call(args) }
    }
}

impl<R, A> Drop for Hook<R, A> {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            if state.installed {
                // Safety: restoring the bytes the trampoline preserved; the
                // single-threaded patching contract is the creator's
                let _ = unsafe {
                    patch::write_code(
                        state.function.address() as *mut u8,
                        &state.trampoline[..state.displaced_len],
                    )
                };
            }
        }
    }
}
