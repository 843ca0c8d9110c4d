//! Collector and finalizer integration tests
//!
//! Covers reachability through the stack, the registry and upvalues,
//! once-only `__gc` finalization, automatic collection at allocation safe
//! points, and finalizers run when a state is closed.

use std::alloc::Layout;
use std::cell::Cell;
use std::rc::Rc;
use tether_engine::{Vm, VmOptions};

/// Push a userdata whose metatable counts `__gc` calls in `counter`.
fn push_counted_userdata(vm: &Vm, counter: &Rc<Cell<usize>>) {
    vm.new_userdata(Layout::new::<u64>()).unwrap();
    vm.new_table().unwrap();
    let counter = counter.clone();
    vm.push_native_function(Rc::new(move |_| {
        counter.set(counter.get() + 1);
        Ok(0)
    }))
    .unwrap();
    vm.set_field(-2, "__gc").unwrap();
    vm.set_metatable(-2).unwrap();
}

// ===== Reachability =====

#[test]
fn test_stack_values_survive_collection() {
    let vm = Vm::new();
    vm.new_table().unwrap();
    vm.push_integer(3);
    vm.set_field(1, "x").unwrap();
    vm.collect_garbage();
    vm.get_field(1, "x").unwrap();
    assert_eq!(vm.to_integer(-1), Some(3));
}

#[test]
fn test_unreachable_tables_are_freed() {
    let vm = Vm::new();
    let baseline = vm.object_count();
    for _ in 0..10 {
        vm.new_table().unwrap();
    }
    vm.pop(10);
    assert_eq!(vm.collect_garbage(), 10);
    assert_eq!(vm.object_count(), baseline);
}

#[test]
fn test_registry_handles_pin_values() {
    let vm = Vm::new();
    vm.new_table().unwrap();
    vm.push_string("kept");
    vm.set_field(-2, "tag").unwrap();
    let key = vm.create_ref();
    vm.collect_garbage();

    vm.push_ref(key);
    vm.get_field(-1, "tag").unwrap();
    assert_eq!(vm.to_str(-1).as_deref(), Some("kept"));
    vm.pop(2);

    let before = vm.object_count();
    vm.release_ref(key);
    vm.collect_garbage();
    assert_eq!(vm.object_count(), before - 1);
}

#[test]
fn test_closure_upvalues_are_traced() {
    let vm = Vm::new();
    vm.new_table().unwrap();
    vm.push_native_closure(Rc::new(|_| Ok(0)), 1).unwrap();
    let before = vm.object_count();
    vm.collect_garbage();
    assert_eq!(vm.object_count(), before);
}

// ===== Finalizers =====

#[test]
fn test_finalizer_runs_once_then_block_is_freed() {
    let vm = Vm::new();
    let counter = Rc::new(Cell::new(0));
    push_counted_userdata(&vm, &counter);
    vm.pop(1);

    vm.collect_garbage();
    assert_eq!(counter.get(), 1);
    let after_first = vm.object_count();

    vm.collect_garbage();
    assert_eq!(counter.get(), 1);
    assert!(vm.object_count() < after_first);
    assert_eq!(vm.gc_stats().finalizers_run, 1);
}

#[test]
fn test_failing_finalizer_does_not_escape() {
    let vm = Vm::new();
    vm.new_userdata(Layout::new::<u8>()).unwrap();
    vm.new_table().unwrap();
    vm.push_native_function(Rc::new(|st| Err(st.error("finalizer failed"))))
        .unwrap();
    vm.set_field(-2, "__gc").unwrap();
    vm.set_metatable(-2).unwrap();
    vm.pop(1);

    vm.collect_garbage();
    assert_eq!(vm.top(), 0);
    assert_eq!(vm.gc_stats().finalizers_run, 1);
}

#[test]
fn test_close_runs_pending_finalizers() {
    let counter = Rc::new(Cell::new(0));
    {
        let vm = Vm::new();
        push_counted_userdata(&vm, &counter);
        push_counted_userdata(&vm, &counter);
        assert_eq!(counter.get(), 0);
    }
    assert_eq!(counter.get(), 2);
}

#[test]
fn test_handles_outliving_vm_see_empty_state() {
    let vm = Vm::new();
    let handle = vm.state().clone();
    vm.push_integer(1);
    drop(vm);
    assert_eq!(handle.top(), 0);
    handle.push_integer(2);
    assert_eq!(handle.to_integer(-1), Some(2));
}

// ===== Automatic Collection =====

#[test]
fn test_threshold_triggers_collection() {
    let vm = Vm::with_options(VmOptions::default().with_gc_threshold(4 * 1024));
    for _ in 0..500 {
        vm.new_table().unwrap();
        vm.pop(1);
    }
    let stats = vm.gc_stats();
    assert!(stats.collections > 0, "allocation should have triggered a collection");
    assert!(stats.objects_freed > 0);
}

#[test]
fn test_heap_limit_yields_memory_error() {
    let vm = Vm::with_options(VmOptions::default().with_max_heap_bytes(2 * 1024));
    let mut failed = None;
    for i in 0..1000 {
        if let Err(e) = vm.new_table() {
            failed = Some((i, e));
            break;
        }
    }
    let (count, err) = failed.expect("heap limit should be reached");
    assert_eq!(err.status(), tether_engine::Status::Memory);
    assert_eq!(vm.top(), count);
}
