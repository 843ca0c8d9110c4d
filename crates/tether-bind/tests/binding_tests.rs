//! End-to-end tests of the binding layer against a live guest state.

use std::cell::Cell;
use std::rc::Rc;
use tether_bind::{Error, Reference, Result, Stack, TypeRegister, UserType};
use tether_engine::{Status, ValueType, Vm, VmOptions};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

impl Point {
    fn length_squared(&self) -> i32 {
        self.x * self.x + self.y * self.y
    }

    fn translate(&mut self, dx: i32, dy: i32) {
        self.x += dx;
        self.y += dy;
    }
}

thread_local! {
    static POINT_REGISTRATIONS: Cell<u32> = Cell::new(0);
}

impl UserType for Point {
    fn register(reg: &mut TypeRegister<'_, Self>) -> Result<()> {
        POINT_REGISTRATIONS.with(|c| c.set(c.get() + 1));
        reg.register_property_rw("X", |p: &Point| p.x, |p: &mut Point, x: i32| p.x = x)?
            .register_property("Y", |p: &Point| p.y)?
            .register_method("length_squared", Point::length_squared)?
            .register_method("translate", Point::translate)?;
        Ok(())
    }
}

/// Counts drops through a shared cell.
struct DropCounter(Rc<Cell<u32>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

impl UserType for DropCounter {}

/// Must be registered before use.
struct Sealed(#[allow(dead_code)] DropCounter);

impl UserType for Sealed {
    const AUTO_REGISTER: bool = false;
}

fn add(a: i32, b: i32) -> i32 {
    a + b
}

/// `object:name(args..)` with the object and args on top of the stack.
fn invoke_method(stack: &Stack, name: &str, nargs: i32, nrets: i32) -> Result<()> {
    let object = stack.top() - nargs;
    stack.get_field(object, name)?;
    stack.insert(object);
    stack.call_and_throw(nargs + 1, nrets)
}

// ============================================================================
// Properties and Methods
// ============================================================================

#[test]
fn test_point_properties() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push(Point { x: 1, y: 2 }).unwrap();
    stack.set_global("p").unwrap();

    stack.get_global("p").unwrap();
    stack.get_field(1, "X").unwrap();
    assert_eq!(stack.read::<i32>(-1).unwrap(), 1);
    stack.pop(1);

    stack.push(5).unwrap();
    stack.set_field(1, "X").unwrap();
    stack.get_field(1, "X").unwrap();
    assert_eq!(stack.read::<i32>(-1).unwrap(), 5);
    stack.pop(1);

    assert_eq!(stack.read::<Point>(1).unwrap(), Point { x: 5, y: 2 });
    assert_eq!(stack.top(), 1);
}

#[test]
fn test_read_only_and_unknown_properties() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push(Point { x: 0, y: 7 }).unwrap();

    stack.push(1).unwrap();
    let err = stack.set_field(1, "Z").unwrap_err();
    assert_eq!(err.to_string(), "Property 'Z' cannot be set");

    stack.push(1).unwrap();
    let err = stack.set_field(1, "Y").unwrap_err();
    assert_eq!(err.to_string(), "Property 'Y' cannot be set");
    assert_eq!(stack.top(), 1);

    assert_eq!(stack.get_field(1, "Y").unwrap(), ValueType::Number);
    assert_eq!(stack.get_field(1, "missing").unwrap(), ValueType::Nil);
    stack.push(3).unwrap();
    assert_eq!(stack.state().get_table(1).unwrap(), ValueType::Nil);
}

#[test]
fn test_methods_through_dispatch_table() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push(Point { x: 3, y: 4 }).unwrap();

    stack.push_value(1);
    invoke_method(&stack, "length_squared", 0, 1).unwrap();
    assert_eq!(stack.read::<i32>(-1).unwrap(), 25);
    stack.pop(1);

    stack.push_value(1);
    stack.push(1).unwrap();
    stack.push(-1).unwrap();
    invoke_method(&stack, "translate", 2, 0).unwrap();
    assert_eq!(stack.top(), 1);
    assert_eq!(stack.read::<Point>(1).unwrap(), Point { x: 4, y: 3 });
}

#[test]
fn test_registration_is_idempotent() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    let before = POINT_REGISTRATIONS.with(Cell::get);
    stack.register_type::<Point>().unwrap();
    stack.register_type::<Point>().unwrap();
    stack.push(Point { x: 0, y: 0 }).unwrap();
    assert_eq!(POINT_REGISTRATIONS.with(Cell::get), before + 1);
    assert_eq!(stack.top(), 1);
}

// ============================================================================
// Free Functions
// ============================================================================

#[test]
fn test_free_function_call() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push_function(add).unwrap();
    stack.set_global("add").unwrap();

    stack.get_global("add").unwrap();
    stack.push(2).unwrap();
    stack.push(3).unwrap();
    stack.call_and_throw(2, 1).unwrap();
    assert_eq!(stack.read::<i32>(-1).unwrap(), 5);
    stack.pop(1);

    stack.get_global("add").unwrap();
    stack.push(2).unwrap();
    stack.push("three").unwrap();
    let err = stack.call_and_throw(2, 1).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("bad argument #2 (expected number, got string)"));
    assert_eq!(stack.top(), 0);
}

#[test]
fn test_panic_and_error_become_guest_errors() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack
        .push_function(|n: i32| -> i32 {
            if n > 0 {
                panic!("cannot handle {}", n);
            }
            n
        })
        .unwrap();
    stack.push(1).unwrap();
    let err = stack.call_and_throw(1, 1).unwrap_err();
    assert!(matches!(&err, Error::Runtime(m) if m.starts_with("cannot handle 1")));

    stack
        .push_raw_function(|st: &Stack| Err(st.error("raw failure")))
        .unwrap();
    assert_eq!(stack.pcall(0, 0, 0), Status::Runtime);
    assert_eq!(stack.read::<String>(-1).unwrap(), "raw failure");
}

#[test]
fn test_modules_and_callables() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    let total = Rc::new(Cell::new(0i64));
    let sink = total.clone();
    {
        let mut module = stack.register_module("math2").unwrap();
        module
            .register_value("pi", 3.25)
            .unwrap()
            .register_method("add", add)
            .unwrap()
            .register_callable("accumulate", move |n: i64| {
                sink.set(sink.get() + n);
                sink.get()
            })
            .unwrap();
    }
    assert_eq!(stack.top(), 0);

    stack.get_global("math2").unwrap();
    stack.get_field(1, "accumulate").unwrap();
    stack.push(10).unwrap();
    stack.call_and_throw(1, 1).unwrap();
    stack.get_field(1, "accumulate").unwrap();
    stack.push(5).unwrap();
    stack.call_and_throw(1, 1).unwrap();
    assert_eq!(stack.read::<i64>(-1).unwrap(), 15);
    assert_eq!(total.get(), 15);

    stack.get_field(1, "pi").unwrap();
    assert_eq!(stack.read::<f64>(-1).unwrap(), 3.25);
}

// ============================================================================
// Object Lifetime
// ============================================================================

#[test]
fn test_destructor_runs_once_on_collection() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    let drops = Rc::new(Cell::new(0));
    for _ in 0..3 {
        stack.push(DropCounter(drops.clone())).unwrap();
    }
    stack.pop(2);
    stack.collect_garbage();
    stack.collect_garbage();
    assert_eq!(drops.get(), 2);
    assert!(stack.check_type::<DropCounter>(1));
    drop(vm);
    assert_eq!(drops.get(), 3);
}

#[test]
fn test_destructor_runs_once_on_close() {
    let drops = Rc::new(Cell::new(0));
    {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        for _ in 0..4 {
            stack.push(DropCounter(drops.clone())).unwrap();
        }
        stack.set_global("keep").unwrap();
        assert_eq!(drops.get(), 0);
    }
    assert_eq!(drops.get(), 4);
}

#[test]
fn test_unregistered_type_fails_and_drops_value() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    let drops = Rc::new(Cell::new(0));
    let err = stack
        .new_object(Sealed(DropCounter(drops.clone())))
        .unwrap_err();
    assert!(matches!(err, Error::NotRegistered(ref name) if name == "Sealed"));
    assert_eq!(drops.get(), 1);
    assert_eq!(stack.top(), 0);

    stack.register_type::<Sealed>().unwrap();
    stack.new_object(Sealed(DropCounter(drops.clone()))).unwrap();
    stack.pop(1);
    stack.collect_garbage();
    assert_eq!(drops.get(), 2);
}

#[test]
fn test_heap_limit_is_out_of_memory() {
    let vm = Vm::with_options(VmOptions::default().with_max_heap_bytes(32 * 1024));
    let stack = Stack::new(&vm);
    let drops = Rc::new(Cell::new(0));
    let mut pushed = 0;
    let err = loop {
        match stack.push(DropCounter(drops.clone())) {
            Ok(()) => pushed += 1,
            Err(e) => break e,
        }
        assert!(pushed < 100_000, "heap limit never reached");
    };
    assert!(matches!(err, Error::OutOfMemory));
    assert_eq!(stack.top(), pushed);
    assert_eq!(drops.get(), 1);
}

// ============================================================================
// References
// ============================================================================

#[test]
fn test_reference_outlives_frame() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    let captured: Rc<Cell<Option<Reference>>> = Rc::new(Cell::new(None));
    let slot = captured.clone();
    stack
        .push_raw_function(move |st: &Stack| {
            st.push(Point { x: 9, y: 9 })?;
            slot.set(Some(Reference::capture(st)));
            Ok(0)
        })
        .unwrap();
    stack.call_and_throw(0, 0).unwrap();
    stack.collect_garbage();

    let reference = captured.take().unwrap();
    stack.push(&reference).unwrap();
    assert_eq!(stack.read::<Point>(-1).unwrap(), Point { x: 9, y: 9 });
    assert_eq!(vm.ref_count(), 1);

    let clones: Vec<Reference> = (0..3).map(|_| reference.clone()).collect();
    assert_eq!(vm.ref_count(), 4);
    drop(clones);
    drop(reference);
    assert_eq!(vm.ref_count(), 0);
}

#[test]
fn test_reference_as_argument() {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    let kept: Rc<Cell<Option<Reference>>> = Rc::new(Cell::new(None));
    let slot = kept.clone();
    stack
        .push_function(move |r: Reference| slot.set(Some(r)))
        .unwrap();
    stack.push("remember me").unwrap();
    stack.call_and_throw(1, 0).unwrap();
    assert_eq!(stack.top(), 0);

    let reference = kept.take().unwrap();
    stack.push(reference).unwrap();
    assert_eq!(stack.read::<String>(-1).unwrap(), "remember me");
    assert_eq!(vm.ref_count(), 0);
}
