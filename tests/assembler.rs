use lockstep::assembler::{assemble, AsmError};
use lockstep::bytecode::{AluOp, Cond, Instr, Operand, MAX_USER_INSTRUCTIONS, ROM_PADDING};

#[test]
fn rom_is_sealed_with_terminator_and_padding() {
    let rom = assemble("mv s0 1\nmv s1 2\n").expect("assembly should succeed");
    assert_eq!(rom.user_len(), 2);
    assert_eq!(rom.len(), 2 + 1 + ROM_PADDING);
    assert_eq!(rom.get(2), Some(&Instr::Halt));
    for at in 3..rom.len() {
        assert_eq!(rom.get(at), Some(&Instr::Nop));
    }
}

#[test]
fn comments_blanks_and_case_are_normalised() {
    let rom = assemble("; leading comment\n\n  MV S0 1  ; trailing\n").expect("assembly should succeed");
    assert_eq!(rom.user_len(), 1);
    assert_eq!(rom.get(0), Some(&Instr::MovRegImm { dst: 2, imm: 1 }));
}

#[test]
fn register_aliases_and_indices_agree() {
    let rom = assemble("mv ra 1\nmv sp 2\nmv s0 3\nmv s5 4\nmv x7 5\n")
        .expect("assembly should succeed");
    let dsts: Vec<u8> = (0..5)
        .map(|i| match rom.get(i) {
            Some(&Instr::MovRegImm { dst, .. }) => dst,
            other => panic!("expected specialized mv, got {other:?}"),
        })
        .collect();
    assert_eq!(dsts, vec![0, 1, 2, 7, 7]);
}

#[test]
fn immediates_accept_decimal_and_hex() {
    let rom = assemble("mv s0 -42\nmv s1 0x10\nmv s2 0xffffffff\n").expect("assembly should succeed");
    assert_eq!(rom.get(0), Some(&Instr::MovRegImm { dst: 2, imm: -42 }));
    assert_eq!(rom.get(1), Some(&Instr::MovRegImm { dst: 3, imm: 16 }));
    assert_eq!(rom.get(2), Some(&Instr::MovRegImm { dst: 4, imm: -1 }));
}

#[test]
fn mv_specializes_only_the_register_immediate_shape() {
    let rom = assemble("mv s0 7\nmv [0] 7\nmv s0 s1\n").expect("assembly should succeed");
    assert!(matches!(rom.get(0), Some(Instr::MovRegImm { .. })));
    assert!(matches!(rom.get(1), Some(Instr::Mov { .. })));
    assert!(matches!(rom.get(2), Some(Instr::Mov { .. })));
}

#[test]
fn addition_specializes_both_immediate_positions() {
    let rom = assemble("c+ s0 s1 5\nc+ s0 5 s1\nc+ s0 s1 s2\n").expect("assembly should succeed");
    assert_eq!(
        rom.get(0),
        Some(&Instr::AddRegRegImm {
            dst: 2,
            src: 3,
            imm: 5
        })
    );
    assert_eq!(rom.get(0), rom.get(1));
    assert!(matches!(rom.get(2), Some(Instr::Alu { op: AluOp::Add, .. })));
}

#[test]
fn swapped_comparisons_reuse_the_canonical_operations() {
    let rom = assemble("c> s0 s1 s2\nc<= s0 s1 s2\n").expect("assembly should succeed");
    match rom.get(0) {
        Some(Instr::Alu {
            op: AluOp::Lt,
            lhs: Operand::Reg(4),
            rhs: Operand::Reg(3),
            ..
        }) => {}
        other => panic!("c> must become c< with swapped operands, got {other:?}"),
    }
    match rom.get(1) {
        Some(Instr::Alu {
            op: AluOp::Ge,
            lhs: Operand::Reg(4),
            rhs: Operand::Reg(3),
            ..
        }) => {}
        other => panic!("c<= must become c>= with swapped operands, got {other:?}"),
    }
}

#[test]
fn branch_shapes_specialize() {
    let text = "b== s0 s1 done\nb< s0 10 done\nb< 10 s0 done\nb== [0] 0 done\ndone:\n";
    let rom = assemble(text).expect("assembly should succeed");
    assert!(matches!(
        rom.get(0),
        Some(Instr::BranchRegReg { cond: Cond::Eq, .. })
    ));
    assert!(matches!(
        rom.get(1),
        Some(Instr::BranchRegImm { cond: Cond::Lt, .. })
    ));
    // 10 < s0 reads the register and flips the predicate.
    assert_eq!(
        rom.get(2),
        Some(&Instr::BranchRegImm {
            cond: Cond::Gt,
            lhs: 2,
            imm: 10,
            target: 3
        })
    );
    assert!(matches!(rom.get(3), Some(Instr::Branch { .. })));
}

#[test]
fn branch_targets_are_stored_pre_decremented() {
    let rom = assemble("start:\nj start\nb== s0 s1 start\n").expect("assembly should succeed");
    assert_eq!(rom.get(0), Some(&Instr::Jump { target: -1 }));
    assert!(matches!(
        rom.get(1),
        Some(Instr::BranchRegReg { target: -1, .. })
    ));
}

#[test]
fn successive_labels_collapse_and_a_trailing_label_is_the_terminator() {
    let text = "j one\nj two\nj tail\none:\ntwo:\nmv s0 1\ntail:\n";
    let rom = assemble(text).expect("assembly should succeed");
    // one: and two: both name index 3; tail: names index 4, the terminator.
    assert_eq!(rom.get(0), Some(&Instr::Jump { target: 2 }));
    assert_eq!(rom.get(1), Some(&Instr::Jump { target: 2 }));
    assert_eq!(rom.get(2), Some(&Instr::Jump { target: 3 }));
    assert_eq!(rom.user_len(), 4);
}

#[test]
fn jump_through_a_register_is_indirect() {
    let rom = assemble("j ra\nj s3\n").expect("assembly should succeed");
    assert_eq!(rom.get(0), Some(&Instr::JumpReg { reg: 0 }));
    assert_eq!(rom.get(1), Some(&Instr::JumpReg { reg: 5 }));
}

#[test]
fn pop_reverses_its_operands_at_parse_time() {
    let rom = assemble("pop s0 s1 s2\n").expect("assembly should succeed");
    assert_eq!(
        rom.get(0),
        Some(&Instr::Pop {
            targets: vec![Operand::Reg(4), Operand::Reg(3), Operand::Reg(2)]
        })
    );
}

#[test]
fn memory_operands_nest() {
    let rom = assemble("mv s0 [[0]]\n").expect("assembly should succeed");
    assert_eq!(
        rom.get(0),
        Some(&Instr::Mov {
            dst: Operand::Reg(2),
            src: Operand::Mem(Box::new(Operand::Mem(Box::new(Operand::Imm(0)))))
        })
    );
}

#[test]
fn io_shift_defaults_to_zero() {
    let rom = assemble("in s0 1\nin s0 1 8\nout 0 s0\nout 0 s0 4\n").expect("assembly should succeed");
    assert!(matches!(rom.get(0), Some(Instr::In { shift: 0, .. })));
    assert!(matches!(rom.get(1), Some(Instr::In { shift: 8, .. })));
    assert!(matches!(rom.get(2), Some(Instr::Out { shift: 0, .. })));
    assert!(matches!(rom.get(3), Some(Instr::Out { shift: 4, .. })));
}

#[test]
fn errors_carry_the_offending_line() {
    match assemble("mv s0 1\nfrob s0\n") {
        Err(AsmError::UnknownOpcode { line, opcode }) => {
            assert_eq!(line, 2);
            assert_eq!(opcode, "frob");
        }
        other => panic!("expected an unknown opcode error, got {other:?}"),
    }
    match assemble("mv s0\n") {
        Err(AsmError::WrongArity { line: 1, found: 1, .. }) => {}
        other => panic!("expected an arity error, got {other:?}"),
    }
    match assemble("b== s0 0 nowhere\n") {
        Err(AsmError::UndefinedLabel { line: 1, label }) => assert_eq!(label, "nowhere"),
        other => panic!("expected an undefined label error, got {other:?}"),
    }
    match assemble("spot:\nspot:\n") {
        Err(AsmError::DuplicateLabel { line: 2, .. }) => {}
        other => panic!("expected a duplicate label error, got {other:?}"),
    }
    match assemble("mv s9 0\n") {
        Err(AsmError::InvalidOperand { line: 1, token }) => assert_eq!(token, "s9"),
        other => panic!("expected an invalid operand error, got {other:?}"),
    }
}

#[test]
fn programs_over_the_rom_limit_are_rejected() {
    let text = "mv s0 0\n".repeat(MAX_USER_INSTRUCTIONS + 1);
    match assemble(&text) {
        Err(AsmError::ProgramTooLong { found, limit }) => {
            assert_eq!(found, MAX_USER_INSTRUCTIONS + 1);
            assert_eq!(limit, MAX_USER_INSTRUCTIONS);
        }
        other => panic!("expected a length error, got {other:?}"),
    }
}
