//! Several vCPUs sharing one block store.

use std::sync::{Arc, Barrier};
use std::thread;

use super::*;

const THREADS: usize = 4;

#[test]
fn test_concurrent_inserts_keep_first() {
    let store = Arc::new(TbStore::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let ids: Vec<usize> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.insert(block(0x1000, 4 * (i as u32 + 1), vec![]))
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert!(ids.iter().all(|&id| id == ids[0]));
    assert_eq!(store.len(), 1);
    assert_eq!(store.lookup(key(0x1000)), Some(ids[0]));
}

#[test]
fn test_vcpus_share_translations() {
    let store = Arc::new(TbStore::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Guest memory is per vCPU; only blocks are shared.
                let mem = FlatMemory::with_code(CODE, &COUNTDOWN, 0x100);
                let mut cpu = A64Cpu::default();
                cpu.pc = CODE;
                cpu.xregs[2] = i as u64 + 1;
                let mut env = ExecEnv::new(store);
                let mut exec = Interp::new(&mem).with_budget(1000);
                barrier.wait();
                let exit = cpu_exec_loop(&mut env, &mut cpu, &mut exec, &mem);
                (exit, cpu.xregs[1])
            })
        })
        .collect();

    for (i, h) in handles.into_iter().enumerate() {
        let (exit, x1) = h.join().unwrap();
        assert!(
            matches!(exit, ExitReason::Exception { kind, .. }
                if kind == ExceptionKind::Brk),
            "vcpu {i}: {exit:?}"
        );
        assert_eq!(x1, 3 * (i as u64 + 1), "vcpu {i}");
    }
    // Entry, loop body and brk, however the translations raced.
    let valid = (0..store.len())
        .filter_map(|id| store.get(id))
        .filter(|tb| tb.is_valid())
        .count();
    assert_eq!(valid, 3);
    assert_eq!(store.len(), 3);
}

#[test]
fn test_invalidate_while_running() {
    let store = Arc::new(TbStore::new());
    let runner = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let mem = FlatMemory::with_code(CODE, &COUNTDOWN, 0x100);
            let mut results = Vec::new();
            for _ in 0..50 {
                let mut cpu = A64Cpu::default();
                cpu.pc = CODE;
                cpu.xregs[2] = 2;
                let mut env = ExecEnv::new(Arc::clone(&store));
                let mut exec = Interp::new(&mem).with_budget(1000);
                cpu_exec_loop(&mut env, &mut cpu, &mut exec, &mem);
                results.push(cpu.xregs[1]);
            }
            results
        })
    };
    for _ in 0..50 {
        store.invalidate_phys_page(CODE);
        thread::yield_now();
    }
    let results = runner.join().unwrap();
    assert!(results.iter().all(|&x1| x1 == 6));
}

#[test]
fn test_shared_block_reads_each_cpu_midr() {
    // mrs x0, midr_el1; brk #0
    let code = [0xd538_0000, brk(0)];
    let store = Arc::new(TbStore::new());
    let mem = FlatMemory::with_code(CODE, &code, 0);
    let mut midrs = Vec::new();
    for midr in [0x410f_d0c0, 0x4100_0001] {
        let mut cpu = A64Cpu::new(A64Cfg {
            midr,
            ..A64Cfg::ARMV8_4
        });
        cpu.pc = CODE;
        let mut env = ExecEnv::new(Arc::clone(&store));
        let mut exec = Interp::new(&mem).with_budget(10);
        cpu_exec_loop(&mut env, &mut cpu, &mut exec, &mem);
        midrs.push(cpu.xregs[0]);
    }
    assert_eq!(midrs, vec![0x410f_d0c0, 0x4100_0001]);
    // Both CPUs ran the same translation.
    assert_eq!(store.len(), 1);
}
