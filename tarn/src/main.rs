use std::rc::Rc;

use clap::Parser;

use tarn::{RegVal, ShadowRegistry, Type, TypeTag, Val, release_managed, wrap_vector};

/// Walk the unboxed value layer end to end: box a vector, shadow it, mutate
/// through the shadow, and flush back into the boxed form.
#[derive(Parser)]
#[command(name = "tarn", about = "tarn unboxed value layer demo")]
struct Args {
    /// Length of the demo vector
    #[arg(long, default_value_t = 5)]
    len: usize,

    /// Slot to overwrite through the shadow
    #[arg(long, default_value_t = 1)]
    slot: usize,

    /// Replacement value for the chosen slot
    #[arg(long, default_value_t = 42)]
    value: i64,
}

fn render(v: &Val) -> String {
    let elems = v.vector_raw().read();
    let parts: Vec<String> = elems
        .iter()
        .map(|e| match e {
            Some(e) => e.as_int().to_string(),
            None => "<hole>".to_string(),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let len = args.len.max(1);
    let slot = args.slot.min(len - 1);

    let vec_ty = Type::vector_of(Type::new(TypeTag::Int));
    let elems = (0..len)
        .map(|i| {
            if i == len / 2 {
                None
            } else {
                Some(Val::int(i as i64))
            }
        })
        .collect();
    let boxed = Val::vector(vec_ty, elems);
    println!("boxed:   {}", render(&boxed));

    let registry = Rc::new(ShadowRegistry::new());
    let handle = wrap_vector(&boxed, Some(&registry), true);
    println!("shadowed {} slots, {} live shadow(s)", handle.shadow().borrow().len(), registry.live());

    handle.shadow().borrow_mut().cells_mut()[slot] = RegVal::from_int(args.value);
    println!("slot {slot} <- {} (dirty: {})", args.value, handle.shadow().borrow().is_dirty());

    handle.shadow().borrow_mut().spill();
    println!("spilled: {}", render(&boxed));

    drop(handle);
    println!("{} live shadow(s) after drop", registry.live());

    // A register cell round trip for good measure.
    let mut status = tarn::ExecStatus::default();
    let str_ty = Type::new(TypeTag::String);
    let mut cell = RegVal::from_val(Some(&Val::string("tarn")), &str_ty, None, None, &mut status);
    // SAFETY: the cell was constructed as a string just above.
    let back = unsafe { cell.to_val(&str_ty) };
    println!("string round trip: {}", back.as_bytes());
    unsafe { release_managed(&mut cell, &str_ty) };
}
