use crate::error::VmError;
use crate::instruction::{Decoded, Instruction, Register::*, Reserved};
use crate::state::State;
use crate::terminal::Terminal;
use crate::trap_vector::TrapVector;
use crate::SignExtend;

/// Fetches, decodes, and executes exactly one instruction. Returns `Ok(())` having possibly
/// flipped `state.running` to `false` (on `HALT`), or `Err` for a fatal fault (`RTI`/`RES`, an
/// unknown trap vector, or a terminal I/O failure).
pub fn step(state: &mut State, terminal: &mut dyn Terminal) -> Result<(), VmError> {
    let address = state.pc;
    let raw = state.memory.read(address, terminal);
    state.pc = state.pc.wrapping_add(1);

    match Instruction::decode(raw, address)? {
        Decoded::Reserved(Reserved::Rti) | Decoded::Reserved(Reserved::Res) => {
            Err(VmError::ReservedOpcode {
                opcode: raw,
                address,
            })
        }
        Decoded::Instruction(instruction) => execute(state, instruction, terminal),
    }
}

fn execute(
    state: &mut State,
    instruction: Instruction,
    terminal: &mut dyn Terminal,
) -> Result<(), VmError> {
    match instruction {
        // BR - Conditional Branch
        //
        // The condition codes specified by n/z/p are tested against COND. If any tested code
        // is set, branch to PC + PCoffset9 (PC already incremented past this instruction).
        Instruction::Br(condition, pc_offset) => {
            let taken = (condition.n && state.condition == crate::state::Condition::N)
                || (condition.z && state.condition == crate::state::Condition::Z)
                || (condition.p && state.condition == crate::state::Condition::P);

            if taken {
                state.pc = state.pc.wrapping_add(pc_offset.sign_extend(9));
            }

            Ok(())
        }

        // ADD - Addition
        Instruction::Add(dr, sr1, sr2) => {
            let value = state
                .registers
                .read(sr1)
                .wrapping_add(state.registers.read(sr2));

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }
        Instruction::AddImm(dr, sr1, imm5) => {
            let value = state.registers.read(sr1).wrapping_add(imm5);

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }

        // LD - Load
        Instruction::Ld(dr, pc_offset) => {
            let address = state.pc.wrapping_add(pc_offset.sign_extend(9));
            let value = state.memory.read(address, terminal);

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }

        // ST - Store
        Instruction::St(sr, pc_offset) => {
            let address = state.pc.wrapping_add(pc_offset.sign_extend(9));
            state.memory.write(address, state.registers.read(sr));

            Ok(())
        }

        // JSR / JSRR - Jump to Subroutine
        Instruction::Jsr(pc_offset) => {
            let link = state.pc;
            state.pc = state.pc.wrapping_add(pc_offset.sign_extend(11));
            state.registers.write(R7, link);

            Ok(())
        }
        Instruction::Jsrr(base_r) => {
            let link = state.pc;
            state.pc = state.registers.read(base_r);
            state.registers.write(R7, link);

            Ok(())
        }

        // AND - Bitwise AND
        Instruction::And(dr, sr1, sr2) => {
            let value = state.registers.read(sr1) & state.registers.read(sr2);

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }
        Instruction::AndImm(dr, sr1, imm5) => {
            let value = state.registers.read(sr1) & imm5;

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }

        // LDR - Load Base+offset
        Instruction::Ldr(dr, base_r, offset) => {
            let address = state
                .registers
                .read(base_r)
                .wrapping_add(offset.sign_extend(6));
            let value = state.memory.read(address, terminal);

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }

        // STR - Store Base+offset
        Instruction::Str(sr, base_r, offset) => {
            let address = state
                .registers
                .read(base_r)
                .wrapping_add(offset.sign_extend(6));

            state.memory.write(address, state.registers.read(sr));

            Ok(())
        }

        // NOT - Bitwise Complement
        Instruction::Not(dr, sr) => {
            state.registers.write(dr, !state.registers.read(sr));
            state.update_flags(dr);

            Ok(())
        }

        // LDI - Load Indirect
        Instruction::Ldi(dr, pc_offset) => {
            let pointer = state.pc.wrapping_add(pc_offset.sign_extend(9));
            let address = state.memory.read(pointer, terminal);
            let value = state.memory.read(address, terminal);

            state.registers.write(dr, value);
            state.update_flags(dr);

            Ok(())
        }

        // STI - Store Indirect
        Instruction::Sti(sr, pc_offset) => {
            let pointer = state.pc.wrapping_add(pc_offset.sign_extend(9));
            let address = state.memory.read(pointer, terminal);

            state.memory.write(address, state.registers.read(sr));

            Ok(())
        }

        // JMP / RET - Jump
        Instruction::Jmp(base_r) => {
            state.pc = state.registers.read(base_r);

            Ok(())
        }

        // LEA - Load Effective Address. Does not update flags.
        Instruction::Lea(dr, pc_offset) => {
            let address = state.pc.wrapping_add(pc_offset.sign_extend(9));
            state.registers.write(dr, address);

            Ok(())
        }

        // TRAP - System Call. R7 is set to the post-fetch PC on entry, same as JSR/JSRR, so a
        // trap handler written in LC-3 assembly could RET out of it.
        Instruction::Trap(trap_vector) => {
            state.registers.write(R7, state.pc);
            trap(state, trap_vector, terminal)
        }
    }
}

fn trap(state: &mut State, trap_vector: TrapVector, terminal: &mut dyn Terminal) -> Result<(), VmError> {
    match trap_vector {
        // GETC - read one raw byte, no echo.
        TrapVector::Getc => {
            let byte = terminal.read_byte().map_err(VmError::Terminal)?;
            state.registers.write(R0, u16::from(byte));
            state.update_flags(R0);
        }

        // OUT - write R0's low byte.
        TrapVector::Out => {
            let byte = state.registers.read(R0) as u8;
            terminal.write_byte(byte).map_err(VmError::Terminal)?;
            terminal.flush().map_err(VmError::Terminal)?;
        }

        // PUTS - null-terminated string, one character per word.
        TrapVector::Puts => {
            let mut address = state.registers.read(R0);

            loop {
                let word = state.memory.read(address, terminal);
                if word == 0 {
                    break;
                }

                terminal.write_byte(word as u8).map_err(VmError::Terminal)?;
                address = address.wrapping_add(1);
            }

            terminal.flush().map_err(VmError::Terminal)?;
        }

        // IN - prompt, read one raw byte, echo it back.
        TrapVector::In => {
            for &byte in b"Enter a character: " {
                terminal.write_byte(byte).map_err(VmError::Terminal)?;
            }
            terminal.flush().map_err(VmError::Terminal)?;

            let byte = terminal.read_byte().map_err(VmError::Terminal)?;
            terminal.write_byte(byte).map_err(VmError::Terminal)?;
            terminal.flush().map_err(VmError::Terminal)?;

            state.registers.write(R0, u16::from(byte));
            state.update_flags(R0);
        }

        // PUTSP - null-terminated string, two characters per word (low byte first).
        TrapVector::Putsp => {
            let mut address = state.registers.read(R0);

            loop {
                let word = state.memory.read(address, terminal);
                if word == 0 {
                    break;
                }

                let low = (word & 0xFF) as u8;
                terminal.write_byte(low).map_err(VmError::Terminal)?;

                let high = (word >> 8) as u8;
                if high != 0 {
                    terminal.write_byte(high).map_err(VmError::Terminal)?;
                }

                address = address.wrapping_add(1);
            }

            terminal.flush().map_err(VmError::Terminal)?;
        }

        // HALT - stop the VM.
        TrapVector::Halt => {
            for &byte in b"HALT\n" {
                terminal.write_byte(byte).map_err(VmError::Terminal)?;
            }
            terminal.flush().map_err(VmError::Terminal)?;

            state.running = false;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Register;
    use crate::terminal::tests::FakeTerminal;

    fn new_state() -> State {
        let mut state = State::new();
        state.pc = 0x3000;
        state
    }

    #[test]
    fn add_immediate_updates_flags() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.registers.write(Register::R1, 3);

        execute(
            &mut state,
            Instruction::AddImm(Register::R2, Register::R1, 1),
            &mut terminal,
        )
        .unwrap();

        assert_eq!(state.registers.read(Register::R2), 4);
        assert_eq!(state.condition, crate::state::Condition::P);
    }

    #[test]
    fn add_wraps_on_overflow_and_sets_zero() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.registers.write(Register::R0, 0xFFFF);
        state.registers.write(Register::R1, 1);

        execute(
            &mut state,
            Instruction::Add(Register::R2, Register::R0, Register::R1),
            &mut terminal,
        )
        .unwrap();

        assert_eq!(state.registers.read(Register::R2), 0);
        assert_eq!(state.condition, crate::state::Condition::Z);
    }

    #[test]
    fn not_is_self_inverse() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        let original = 0b1010_1010_1010_1010u16;
        state.registers.write(Register::R0, original);

        execute(
            &mut state,
            Instruction::Not(Register::R1, Register::R0),
            &mut terminal,
        )
        .unwrap();
        let complemented = state.registers.read(Register::R1);
        assert_eq!(complemented, !original);

        execute(
            &mut state,
            Instruction::Not(Register::R2, Register::R1),
            &mut terminal,
        )
        .unwrap();
        assert_eq!(state.registers.read(Register::R2), original);
    }

    #[test]
    fn ldi_dereferences_twice() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.memory.write(0x3001, 0x3010);
        state.memory.write(0x3010, 0xBEEF);

        execute(&mut state, Instruction::Ldi(Register::R2, 1), &mut terminal).unwrap();

        assert_eq!(state.registers.read(Register::R2), 0xBEEF);
        assert_eq!(state.condition, crate::state::Condition::N);
    }

    #[test]
    fn jsr_then_ret_returns_to_call_site() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();

        // JSR #1: jump to pc+1+1, stash the return address (pc+1) in R7.
        execute(&mut state, Instruction::Jsr(1), &mut terminal).unwrap();
        assert_eq!(state.pc, 0x3002);
        assert_eq!(state.registers.read(Register::R7), 0x3001);

        // RET (JMP R7) must land back on the instruction after the JSR.
        execute(&mut state, Instruction::Jmp(Register::R7), &mut terminal).unwrap();
        assert_eq!(state.pc, 0x3001);
    }

    #[test]
    fn br_zero_mask_never_branches() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.condition = crate::state::Condition::Z;

        let condition = crate::instruction::Condition {
            n: false,
            z: false,
            p: false,
        };
        execute(&mut state, Instruction::Br(condition, 5), &mut terminal).unwrap();

        assert_eq!(state.pc, 0x3000);
    }

    #[test]
    fn lea_does_not_update_flags() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.condition = crate::state::Condition::N;

        execute(&mut state, Instruction::Lea(Register::R0, 2), &mut terminal).unwrap();

        assert_eq!(state.registers.read(Register::R0), 0x3002);
        assert_eq!(state.condition, crate::state::Condition::N);
    }

    #[test]
    fn store_instructions_do_not_update_flags() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.condition = crate::state::Condition::N;
        state.registers.write(Register::R0, 7);

        execute(&mut state, Instruction::St(Register::R0, 0), &mut terminal).unwrap();

        assert_eq!(state.condition, crate::state::Condition::N);
        assert_eq!(state.memory.read(0x3001, &mut terminal), 7);
    }

    #[test]
    fn trap_sets_r7_to_return_address() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();

        execute(&mut state, Instruction::Trap(TrapVector::Halt), &mut terminal).unwrap();

        // `execute` never advances `state.pc` itself — that happens in `step` during fetch —
        // so R7 must equal the (test-fixture) PC TRAP was dispatched at.
        assert_eq!(state.registers.read(Register::R7), 0x3000);
    }

    #[test]
    fn trap_halt_stops_the_vm_and_prints_halt() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();

        execute(&mut state, Instruction::Trap(TrapVector::Halt), &mut terminal).unwrap();

        assert!(!state.running);
        assert_eq!(terminal.output_as_string(), "HALT\n");
    }

    #[test]
    fn trap_puts_emits_string_and_stops_at_nul() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.registers.write(Register::R0, 0x4000);
        state.memory.write(0x4000, u16::from(b'H'));
        state.memory.write(0x4001, u16::from(b'i'));
        state.memory.write(0x4002, 0);

        execute(&mut state, Instruction::Trap(TrapVector::Puts), &mut terminal).unwrap();

        assert_eq!(terminal.output_as_string(), "Hi");
    }

    #[test]
    fn trap_putsp_splits_each_word_into_two_bytes() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.registers.write(Register::R0, 0x4000);
        // 0x6948 = 'i' << 8 | 'H', 0x0021 = '!' (high byte 0 is not emitted).
        state.memory.write(0x4000, 0x6948);
        state.memory.write(0x4001, 0x0021);
        state.memory.write(0x4002, 0);

        execute(&mut state, Instruction::Trap(TrapVector::Putsp), &mut terminal).unwrap();

        assert_eq!(terminal.output_as_string(), "Hi!");
    }

    #[test]
    fn trap_getc_reads_without_echo() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::with_input(b"Q");

        execute(&mut state, Instruction::Trap(TrapVector::Getc), &mut terminal).unwrap();

        assert_eq!(state.registers.read(Register::R0), u16::from(b'Q'));
        assert_eq!(terminal.output_as_string(), "");
    }

    #[test]
    fn trap_in_prompts_and_echoes() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::with_input(b"Z");

        execute(&mut state, Instruction::Trap(TrapVector::In), &mut terminal).unwrap();

        assert_eq!(state.registers.read(Register::R0), u16::from(b'Z'));
        assert_eq!(terminal.output_as_string(), "Enter a character: Z");
    }

    #[test]
    fn trap_getc_on_empty_input_is_a_terminal_error() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();

        let result = execute(&mut state, Instruction::Trap(TrapVector::Getc), &mut terminal);

        assert!(matches!(result, Err(VmError::Terminal(_))));
    }

    #[test]
    fn step_on_rti_is_a_fatal_fault() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.memory.write(0x3000, 0x8000);

        let result = step(&mut state, &mut terminal);

        assert!(matches!(
            result,
            Err(VmError::ReservedOpcode {
                opcode: 0x8000,
                address: 0x3000
            })
        ));
    }

    #[test]
    fn step_on_res_is_a_fatal_fault() {
        let mut state = new_state();
        let mut terminal = FakeTerminal::new();
        state.memory.write(0x3000, 0xD000);

        let result = step(&mut state, &mut terminal);

        assert!(matches!(
            result,
            Err(VmError::ReservedOpcode {
                opcode: 0xD000,
                address: 0x3000
            })
        ));
    }
}
