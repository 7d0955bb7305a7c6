//! `convert(x, T)`: the typed-conversion matrix.
//!
//! Conversions never change a value silently: narrowing clamps at
//! runtime, widening is free, and bit-reinterpretation is only allowed
//! where the source bits provably fit (the "bytes clamp" asserts that
//! truncated bytes are zero). Checks that can be discharged statically
//! are.

use num_bigint::BigInt;
use num_traits::One;

use super::{call_parts, BuiltinHandler};
use crate::{
    ast::ExprNode,
    codegen::{context::CodegenContext, value::VyperValue},
    errors::{CodegenError, CodegenResult},
    types::{DECIMAL_DIVISOR, IntegerT, VyperType},
    venom::IROperand,
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[("convert", lower_convert)];

fn lower_convert(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let value_node = &args[0];
    let in_t = value_node.ty.clone();
    let out_t = node.ty.clone();

    let val = ctx.lower_value(value_node)?;
    if in_t == out_t {
        return Ok(VyperValue::from_stack_op(val, out_t));
    }

    use VyperType as T;
    let result: IROperand = match (&in_t, &out_t) {
        (T::Integer(src), T::Integer(_)) => int_to_int(ctx, val, *src, &out_t)?,
        (T::Integer(src), T::Decimal) => int_to_decimal(ctx, val, *src)?,
        (T::Decimal, T::Integer(_)) => decimal_to_int(ctx, val, &out_t)?,
        (T::Bool, T::Integer(_)) => val,
        (T::Bool, T::Decimal) => ctx.builder.mul(val, DECIMAL_DIVISOR).into(),
        (T::Integer(_) | T::Decimal, T::Bool) => bool_from_word(ctx, val),
        (T::BytesM(_), T::Bool) => bool_from_word(ctx, val),
        (T::Integer(src), T::Address) => {
            let address_t = IntegerT::new(160, false);
            int_to_int(ctx, val, *src, &T::Integer(address_t))?
        }
        (T::Address, T::Integer(_)) => {
            let address_as_uint = IntegerT::new(160, false);
            int_to_int(ctx, val, address_as_uint, &out_t)?
        }
        (T::BytesM(m), T::Integer(_)) => bytes_to_int(ctx, val, *m, &out_t)?,
        (T::BytesM(m), T::Address) => {
            let address_t = T::Integer(IntegerT::new(160, false));
            bytes_to_int(ctx, val, *m, &address_t)?
        }
        (T::Integer(src), T::BytesM(m)) => int_to_bytes(ctx, val, *src, *m)?,
        (T::BytesM(m), T::BytesM(k)) => bytes_to_bytes(ctx, val, *m, *k),
        (T::Address, T::BytesM(20)) => ctx.builder.shl(96u64, val).into(),
        (T::Flag { .. }, T::Integer(IntegerT { bits: 256, signed: false })) => val,
        (T::Integer(IntegerT { bits: 256, signed: false }), T::Flag { members, .. }) => {
            let bound = BigInt::one() << members.len();
            let b = &mut ctx.builder;
            let ok = b.lt(val.clone(), bound);
            b.assert_(ok);
            val
        }
        (T::Interface { .. }, T::Address) | (T::Address, T::Interface { .. }) => val,
        _ => {
            return Err(CodegenError::type_check_at(
                format!("cannot convert {in_t:?} to {out_t:?}"),
                node.span,
            ));
        }
    };
    Ok(VyperValue::from_stack_op(result, out_t))
}

fn bool_from_word(ctx: &mut CodegenContext, val: IROperand) -> IROperand {
    let b = &mut ctx.builder;
    let zero = b.iszero(val);
    b.iszero(zero).into()
}

/// Whether every value of `src` already satisfies `dst`'s bounds.
fn bounds_superset(src: &VyperType, dst: &VyperType) -> bool {
    match (src.int_bounds(), dst.int_bounds()) {
        (Some((src_lo, src_hi)), Some((dst_lo, dst_hi))) => src_lo >= dst_lo && src_hi <= dst_hi,
        _ => false,
    }
}

fn int_to_int(
    ctx: &mut CodegenContext,
    val: IROperand,
    src: IntegerT,
    out_t: &VyperType,
) -> CodegenResult<IROperand> {
    if bounds_superset(&VyperType::Integer(src), out_t) {
        return Ok(val);
    }
    ctx.clamp_basetype(val, out_t)
}

fn int_to_decimal(
    ctx: &mut CodegenContext,
    val: IROperand,
    src: IntegerT,
) -> CodegenResult<IROperand> {
    let scaled = ctx.builder.mul(val.clone(), DECIMAL_DIVISOR);
    // wide sources can wrap the scaling multiply; verify by division
    if src.bits + 34 >= 256 {
        let b = &mut ctx.builder;
        let quotient = if src.signed {
            b.sdiv(scaled, DECIMAL_DIVISOR)
        } else {
            b.div(scaled, DECIMAL_DIVISOR)
        };
        let ok = b.eq(quotient, val);
        b.assert_(ok);
    }
    ctx.clamp_basetype(scaled.into(), &VyperType::Decimal)
}

fn decimal_to_int(
    ctx: &mut CodegenContext,
    val: IROperand,
    out_t: &VyperType,
) -> CodegenResult<IROperand> {
    // truncate toward zero, then clamp into the target
    let truncated = ctx.builder.sdiv(val, DECIMAL_DIVISOR);
    if bounds_superset(&VyperType::Integer(IntegerT::new(168, true)), out_t) {
        return Ok(truncated.into());
    }
    ctx.clamp_basetype(truncated.into(), out_t)
}

fn bytes_to_int(
    ctx: &mut CodegenContext,
    val: IROperand,
    m: u8,
    out_t: &VyperType,
) -> CodegenResult<IROperand> {
    let shift_bits = usize::from(32 - m) * 8;
    let shifted = ctx.builder.shr(shift_bits, val);
    let src_bits = u16::from(m) * 8;

    if out_t.is_signed() {
        // reinterpret the m bytes as two's complement
        let extended: IROperand = if src_bits < 256 {
            ctx.builder
                .signextend(usize::from(m - 1), shifted)
                .into()
        } else {
            shifted.into()
        };
        if src_bits <= out_t.bits() {
            Ok(extended)
        } else {
            ctx.clamp_basetype(extended, out_t)
        }
    } else if src_bits <= out_t.bits() {
        Ok(shifted.into())
    } else {
        ctx.clamp_basetype(shifted.into(), out_t)
    }
}

fn int_to_bytes(
    ctx: &mut CodegenContext,
    val: IROperand,
    src: IntegerT,
    m: u8,
) -> CodegenResult<IROperand> {
    let dst_bits = u16::from(m) * 8;
    if src.signed && src.bits == 256 && m == 32 {
        // int256 -> bytes32 reinterprets the word
        return Ok(val);
    }
    let val = if src.signed || src.bits > dst_bits {
        // the value must be representable in m unsigned bytes
        let fits = IntegerT::new(dst_bits, false);
        ctx.clamp_basetype(val, &VyperType::Integer(fits))?
    } else {
        val
    };
    if m == 32 {
        return Ok(val);
    }
    Ok(ctx.builder.shl(usize::from(32 - m) * 8, val).into())
}

/// Widening keeps the word; narrowing asserts the dropped trailing
/// bytes are zero.
fn bytes_to_bytes(ctx: &mut CodegenContext, val: IROperand, m: u8, k: u8) -> IROperand {
    if k >= m {
        return val;
    }
    let mask = (BigInt::one() << (256 - 8 * u32::from(k))) - 1;
    let b = &mut ctx.builder;
    let trailing = b.and(val.clone(), mask);
    let ok = b.iszero(trailing);
    b.assert_(ok);
    val
}
