//! Array allocation, element access and store checks.

mod common;

use common::*;

const INT_ARRAY: u32 = 70;
const BYTE_ARRAY: u32 = 71;
const LONG_ARRAY: u32 = 72;
const DOUBLE_ARRAY: u32 = 73;

fn vm_with_arrays() -> Vm {
    let mut vm = Vm::new();
    for (id, name) in [(INT_ARRAY, "[I"), (BYTE_ARRAY, "[B"), (LONG_ARRAY, "[J"), (DOUBLE_ARRAY, "[D")] {
        let class = vm.rt.define_array_class(name, None);
        vm.rt.register_class(id, class);
    }
    vm
}

/// `v0 = new <class>[3]` followed by `body`.
fn with_array(class_id: u32, body: &[Insn<P>]) -> Vec<Insn<P>> {
    let mut program = vec![
        insn(P::MoviV4Imm4, &[Reg(1), Imm(3)]),
        insn(P::NewarrV4V4Id16, &[Reg(0), Reg(1), Id(class_id)]),
    ];
    program.extend_from_slice(body);
    program
}

// --- access ---

#[test]
fn store_load_and_length() {
    let mut vm = vm_with_arrays();
    let v = vm.eval_snippet(
        3,
        &with_array(
            INT_ARRAY,
            &[
                insn(P::MoviV4Imm4, &[Reg(2), Imm(2)]),
                insn(P::LdaiImm8, &[Imm(42)]),
                insn(P::StarrV4V4, &[Reg(0), Reg(2)]),
                insn(P::LdaiImm8, &[Imm(2)]),
                insn(P::LdarrV8, &[Reg(0)]),
                insn(P::StaV8, &[Reg(2)]),
                insn(P::LenarrV8, &[Reg(0)]),
                insn(P::Add2V8, &[Reg(2)]),
                insn(P::Return, &[]),
            ],
        ),
    );
    assert_eq!(v.i32(), 45);
}

#[test]
fn new_arrays_are_zeroed() {
    let mut vm = vm_with_arrays();
    let v = vm.eval_snippet(
        2,
        &with_array(INT_ARRAY, &[insn(P::LdaiImm8, &[Imm(1)]), insn(P::LdarrV8, &[Reg(0)]), insn(P::Return, &[])]),
    );
    assert_eq!(v.i32(), 0);
}

#[test]
fn byte_elements_are_narrowed() {
    let mut vm = vm_with_arrays();
    let store = [
        insn(P::MoviV4Imm4, &[Reg(2), Imm(0)]),
        insn(P::LdaiImm16, &[Imm(0x1ff)]),
        insn(P::Starr8V4V4, &[Reg(0), Reg(2)]),
        insn(P::LdaiImm8, &[Imm(0)]),
    ];

    let mut signed = store.to_vec();
    signed.extend([insn(P::Ldarr8V8, &[Reg(0)]), insn(P::Return, &[])]);
    assert_eq!(vm.eval_snippet(3, &with_array(BYTE_ARRAY, &signed)).i32(), -1);

    let mut unsigned = store.to_vec();
    unsigned.extend([insn(P::Ldarru8V8, &[Reg(0)]), insn(P::Return, &[])]);
    assert_eq!(vm.eval_snippet(3, &with_array(BYTE_ARRAY, &unsigned)).i32(), 255);
}

#[test]
fn wide_elements() {
    let mut vm = vm_with_arrays();
    let long = vm.eval_snippet(
        3,
        &with_array(
            LONG_ARRAY,
            &[
                insn(P::MoviV4Imm4, &[Reg(2), Imm(1)]),
                insn(P::Ldai64Imm64, &[Imm(-(1 << 40))]),
                insn(P::Starr64V4V4, &[Reg(0), Reg(2)]),
                insn(P::LdaiImm8, &[Imm(1)]),
                insn(P::Ldarr64V8, &[Reg(0)]),
                insn(P::Return64, &[]),
            ],
        ),
    );
    assert_eq!(long.i64(), -(1 << 40));

    let double = vm.eval_snippet(
        3,
        &with_array(
            DOUBLE_ARRAY,
            &[
                insn(P::MoviV4Imm4, &[Reg(2), Imm(2)]),
                insn(P::Fldai64Imm64, &[Float(2.5)]),
                insn(P::Fstarr64V4V4, &[Reg(0), Reg(2)]),
                insn(P::LdaiImm8, &[Imm(2)]),
                insn(P::Fldarr64V8, &[Reg(0)]),
                insn(P::Return64, &[]),
            ],
        ),
    );
    assert_eq!(double.f64(), 2.5);
}

// --- failures ---

#[test]
fn negative_size() {
    let mut vm = vm_with_arrays();
    let kind = vm.throw_snippet(
        2,
        &[
            insn(P::MoviV4Imm4, &[Reg(1), Imm(-1)]),
            insn(P::NewarrV4V4Id16, &[Reg(0), Reg(1), Id(INT_ARRAY)]),
            insn(P::ReturnVoid, &[]),
        ],
    );
    assert_eq!(kind, ExceptionKind::NegativeArraySize(-1));
}

#[test]
fn unresolved_array_class() {
    let mut vm = vm_with_arrays();
    let kind = vm.throw_snippet(
        2,
        &[
            insn(P::MoviV4Imm4, &[Reg(1), Imm(-1)]),
            insn(P::NewarrV4V4Id16, &[Reg(0), Reg(1), Id(99)]),
            insn(P::ReturnVoid, &[]),
        ],
    );
    assert!(matches!(kind, ExceptionKind::Unresolved(_)), "class resolution comes first: {kind:?}");
}

#[test]
fn index_out_of_bounds() {
    let mut vm = vm_with_arrays();
    for index in [3, -1] {
        let kind = vm.throw_snippet(
            2,
            &with_array(
                INT_ARRAY,
                &[insn(P::LdaiImm8, &[Imm(index)]), insn(P::LdarrV8, &[Reg(0)]), insn(P::Return, &[])],
            ),
        );
        assert_eq!(kind, ExceptionKind::ArrayIndexOutOfBounds { index, length: 3 });
        vm.thread.clear_exception();
    }

    let kind = vm.throw_snippet(
        3,
        &with_array(
            INT_ARRAY,
            &[
                insn(P::MoviV4Imm4, &[Reg(2), Imm(7)]),
                insn(P::StarrV4V4, &[Reg(0), Reg(2)]),
                insn(P::ReturnVoid, &[]),
            ],
        ),
    );
    assert_eq!(kind, ExceptionKind::ArrayIndexOutOfBounds { index: 7, length: 3 });
}

#[test]
fn allocation_past_the_heap_limit() {
    let mut vm = Vm::new();
    vm.rt = LocalRuntime::new().with_heap_limit(1024);
    let ints = vm.rt.define_array_class("[I", None);
    vm.rt.register_class(INT_ARRAY, ints);

    let kind = vm.throw_snippet(
        2,
        &[
            insn(P::MoviV8Imm32, &[Reg(1), Imm(i32::MAX as i64)]),
            insn(P::NewarrV4V4Id16, &[Reg(0), Reg(1), Id(INT_ARRAY)]),
            insn(P::ReturnVoid, &[]),
        ],
    );
    assert_eq!(kind, ExceptionKind::OutOfMemory);
    vm.thread.clear_exception();

    let fits = vm.eval_snippet(
        2,
        &[
            insn(P::MoviV8Imm32, &[Reg(1), Imm(512)]),
            insn(P::NewarrV4V4Id16, &[Reg(0), Reg(1), Id(INT_ARRAY)]),
            insn(P::LenarrV8, &[Reg(0)]),
            insn(P::Return, &[]),
        ],
    );
    assert_eq!(fits.i32(), 512, "smaller arrays still allocate");
}

#[test]
fn null_array_is_checked_before_the_index() {
    let mut vm = vm_with_arrays();
    let load = vm.throw_snippet(
        1,
        &[
            insn(P::MovNullV8, &[Reg(0)]),
            insn(P::LdaiImm8, &[Imm(100)]),
            insn(P::LdarrV8, &[Reg(0)]),
            insn(P::Return, &[]),
        ],
    );
    assert_eq!(load, ExceptionKind::NullPointer);
    vm.thread.clear_exception();

    let length = vm.throw_snippet(1, &[insn(P::MovNullV8, &[Reg(0)]), insn(P::LenarrV8, &[Reg(0)]), insn(P::Return, &[])]);
    assert_eq!(length, ExceptionKind::NullPointer);
}

// --- reference stores ---

struct Pets {
    animals: ClassRef,
    dog: ClassRef,
    cat: ClassRef,
    store: std::sync::Arc<Method>,
}

/// `store(array, value)` sets `array[0] = value`.
fn pets(vm: &mut Vm) -> Pets {
    let animal = vm.rt.define_class("Animal", None);
    let dog = vm.rt.define_class("Dog", Some(animal));
    let cat = vm.rt.define_class("Cat", None);
    let animals = vm.rt.define_array_class("[Animal", Some(animal));
    let store = vm.define(
        1,
        "store",
        code(
            1,
            2,
            &[
                insn(P::MoviV4Imm4, &[Reg(0), Imm(0)]),
                insn(P::LdaObjV8, &[Reg(2)]),
                insn(P::StarrObjV4V4, &[Reg(1), Reg(0)]),
                insn(P::ReturnVoid, &[]),
            ],
        ),
    );
    Pets {
        animals,
        dog,
        cat,
        store,
    }
}

#[test]
fn reference_arrays_start_null() {
    let mut vm = Vm::new();
    let pets = pets(&mut vm);
    let array = vm.rt.new_array(pets.animals, 2);
    assert_eq!(vm.rt.array_elements(array).unwrap(), &[VRegister::null(); 2]);
}

#[test]
fn store_of_a_subclass() {
    let mut vm = Vm::new();
    let pets = pets(&mut vm);
    let array = vm.rt.new_array(pets.animals, 1);
    let dog = vm.rt.new_object(pets.dog);

    vm.run(&pets.store, &[obj(array), obj(dog)]);
    assert_eq!(vm.rt.array_elements(array).unwrap()[0], obj(dog));

    vm.run(&pets.store, &[obj(array), VRegister::null()]);
    assert_eq!(vm.rt.array_elements(array).unwrap()[0], VRegister::null(), "null always stores");
}

#[test]
fn failed_store_check_leaves_the_array_untouched() {
    let mut vm = Vm::new();
    let pets = pets(&mut vm);
    let array = vm.rt.new_array(pets.animals, 1);
    let cat = vm.rt.new_object(pets.cat);

    assert_eq!(
        vm.expect_throw(&pets.store, &[obj(array), obj(cat)]),
        ExceptionKind::ArrayStore {
            array: pets.animals,
            value: pets.cat,
        }
    );
    assert_eq!(vm.rt.array_elements(array).unwrap()[0], VRegister::null());
}
