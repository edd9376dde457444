use std::cell::Cell;
use std::rc::Rc;

use lockstep::bytecode::{RAM_WORDS, REGISTER_BANK};
use lockstep::interpreter::{Machine, VmError};

const S0: usize = 2;
const S1: usize = 3;
const S2: usize = 4;
const SP: usize = 1;

fn machine(text: &str) -> Machine {
    let mut machine = Machine::new();
    machine.program(text).expect("program should assemble");
    machine
}

#[test]
fn alu_operations_compute_into_their_destination() {
    let mut m = machine(
        "mv s0 6\n\
         mv s1 3\n\
         c- s2 s0 s1\n\
         c& s3 s0 s1\n\
         c| s4 s0 s1\n\
         c^ s5 s0 s1\n",
    );
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S2), 3);
    assert_eq!(m.register(5), 2);
    assert_eq!(m.register(6), 7);
    assert_eq!(m.register(7), 5);
}

#[test]
fn shifts_distinguish_arithmetic_and_logical() {
    let mut m = machine(
        "mv s0 -8\n\
         c>> s1 s0 1\n\
         c>>> s2 s0 1\n\
         c<< s3 s0 1\n",
    );
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S1), -4);
    assert_eq!(m.register(S2), 0x7ffffffc);
    assert_eq!(m.register(5), -16);
}

#[test]
fn comparison_alu_produces_zero_or_one() {
    let mut m = machine(
        "mv s0 5\n\
         c< s1 s0 9\n\
         c< s2 s0 5\n\
         c>= s3 s0 5\n\
         c> s4 s0 4\n\
         c<= s5 s0 4\n",
    );
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S1), 1);
    assert_eq!(m.register(S2), 0);
    assert_eq!(m.register(5), 1);
    assert_eq!(m.register(6), 1);
    assert_eq!(m.register(7), 0);
}

#[test]
fn push_pop_round_trip_restores_registers_and_sp() {
    let mut m = machine(
        "mv s0 1\n\
         mv s1 2\n\
         mv s2 3\n\
         push s0 s1 s2\n\
         mv s0 0\n\
         mv s1 0\n\
         mv s2 0\n\
         pop s0 s1 s2\n",
    );
    m.run().expect("execution should succeed");
    assert_eq!(
        (m.register(S0), m.register(S1), m.register(S2)),
        (1, 2, 3)
    );
    assert_eq!(m.register(SP), 255);
}

#[test]
fn immediate_branch_specialization_takes_and_falls_through() {
    let taken = "mv s0 5\nb< s0 10 l\nmv s0 0\nl:\n";
    let mut m = machine(taken);
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S0), 5);

    let fallthrough = "mv s0 20\nb< s0 10 l\nmv s0 0\nl:\n";
    let mut m = machine(fallthrough);
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S0), 0);
}

#[test]
fn nested_memory_operands_dereference_twice() {
    let mut m = machine(
        "mv [0] 5\n\
         mv [5] 42\n\
         mv s0 [[0]]\n",
    );
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S0), 42);
}

#[test]
fn reads_or_shifted_input_into_the_destination() {
    let mut m = machine(
        "mv s0 0\n\
         in s0 0\n\
         in s0 1 8\n\
         out 0 s0\n",
    );
    m.set_input(0x21);
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S0), 0x2121);
    assert_eq!(m.output(), 0x2121);
}

#[test]
fn sync_yields_invoke_the_host_callback_each_boundary() {
    let mut m = machine("loop:\nc+ s0 s0 1\nsync\nj loop\n");
    let calls = Rc::new(Cell::new(0u32));
    let seen = calls.clone();
    m.on_sync(move |input, output| {
        seen.set(seen.get() + 1);
        assert_eq!(output, 0);
        *input = 42;
    });
    for _ in 0..5 {
        let more = m.steps(1000).expect("execution should succeed");
        assert!(more, "the loop never finishes on its own");
    }
    assert_eq!(calls.get(), 5);
    assert_eq!(m.register(S0), 5);
    assert_eq!(m.output(), 0);
    // The guest ignores the injected input; the latch still holds it.
    assert_eq!(m.input(), 42);
    assert_eq!(m.metrics().sync_yields, 5);
}

#[test]
fn step_budget_suspends_and_resumes_mid_program() {
    let mut m = machine("mv s0 1\nmv s1 2\nmv s2 3\n");
    let more = m.steps(2).expect("execution should succeed");
    assert!(more);
    assert_eq!(m.register(S0), 1);
    assert_eq!(m.register(S2), 0);
    let more = m.steps(100).expect("execution should succeed");
    assert!(!more);
    assert!(m.finished());
    assert_eq!(m.register(S2), 3);
}

#[test]
fn steps_in_bulk_equals_single_steps() {
    let text = "mv s0 0\nloop:\nc+ s0 s0 1\nb< s0 40 loop\nmv s1 9\n";
    for k in [1usize, 3, 7, 50, 1000] {
        let mut bulk = machine(text);
        let mut single = machine(text);
        bulk.steps(k).expect("execution should succeed");
        for _ in 0..k {
            single.step().expect("execution should succeed");
        }
        assert_eq!(bulk.registers(), single.registers(), "budget {k}");
        assert_eq!(bulk.ram(), single.ram(), "budget {k}");
        assert_eq!(bulk.finished(), single.finished(), "budget {k}");
    }
}

#[test]
fn reset_restores_the_documented_initial_state() {
    let mut m = machine("mv s0 7\nmv [9] 8\nsync\n");
    m.set_input(5);
    m.steps(10).expect("execution should succeed");
    m.reset();
    for (index, value) in m.registers().iter().enumerate() {
        let expected = if index == SP { RAM_WORDS as i32 - 1 } else { 0 };
        assert_eq!(*value, expected, "register {index}");
    }
    assert!(m.ram().iter().all(|w| *w == 0));
    assert!(!m.finished());
    assert_eq!(m.input(), 0);
    assert_eq!(m.output(), 0);
    assert_eq!(m.metrics().instructions, 0);
    assert_eq!(m.registers().len(), REGISTER_BANK);
}

#[test]
fn out_of_range_memory_access_is_fatal() {
    let mut m = machine("mv [300] 1\n");
    match m.run() {
        Err(VmError::MemoryOutOfRange { addr: 300, pc: 0 }) => {}
        other => panic!("expected a memory range fault, got {other:?}"),
    }

    let mut m = machine("mv s0 -1\nmv [s0] 1\n");
    match m.run() {
        Err(VmError::MemoryOutOfRange { addr: -1, pc: 1 }) => {}
        other => panic!("expected a memory range fault, got {other:?}"),
    }
}

#[test]
fn stack_underflow_is_fatal() {
    let mut m = machine("pop s0\n");
    match m.run() {
        Err(VmError::StackUnderflow { .. }) => {}
        other => panic!("expected a stack underflow, got {other:?}"),
    }
}

#[test]
fn stack_overflow_is_fatal() {
    // Point sp below the bottom of RAM, then push.
    let mut m = machine("mv sp -1\npush s0\n");
    match m.run() {
        Err(VmError::StackOverflow { sp: -1, pc: 1 }) => {}
        other => panic!("expected a stack overflow, got {other:?}"),
    }
}

#[test]
fn apc_reads_its_own_index() {
    let mut m = machine("mv s0 0\napc s1 2\napc s2 0\n");
    m.run().expect("execution should succeed");
    assert_eq!(m.register(S1), 3);
    assert_eq!(m.register(S2), 2);
}

#[test]
fn an_unprogrammed_machine_finishes_immediately() {
    let mut m = Machine::new();
    let more = m.step().expect("execution should succeed");
    assert!(!more);
    assert!(m.finished());
}
