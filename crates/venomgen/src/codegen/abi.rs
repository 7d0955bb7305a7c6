//! The ABI codec.
//!
//! Two routines bridge Vyper's memory layout and the Ethereum ABI wire
//! format. `abi_encode_to_buf` writes the head-tail encoding of a value
//! into a destination buffer and returns the byte count; it is used by
//! external calls, return-value marshaling, event data, and the
//! `abi_encode` built-in. `abi_decode_to_buf` walks an encoded region in
//! the other direction, re-validating every dynamic offset against the
//! buffer bound and clamping every word to its type before it lands in
//! memory.

use num_bigint::BigInt;
use num_traits::One;

use crate::{
    codegen::{context::CodegenContext, value::Ptr},
    errors::{CodegenError, CodegenResult},
    types::{DataLocation, VyperType},
    venom::{IROperand, IRVariable},
};

/// Encodes the value at memory pointer `src` into the buffer at `dst`.
/// Returns the number of bytes written: a literal for purely static
/// types, a computed variable otherwise.
pub fn abi_encode_to_buf(
    ctx: &mut CodegenContext,
    dst: IROperand,
    src: &IROperand,
    ty: &VyperType,
) -> CodegenResult<IROperand> {
    encode_r(ctx, &dst, src, ty)
}

fn encode_r(
    ctx: &mut CodegenContext,
    dst: &IROperand,
    src: &IROperand,
    ty: &VyperType,
) -> CodegenResult<IROperand> {
    let abi_t = ty.abi_type();
    if !abi_t.is_dynamic() {
        // static layouts agree between memory and wire format
        let size = abi_t.static_size();
        ctx.copy_memory(dst.clone(), src.clone(), size);
        return Ok(IROperand::from(size));
    }

    match ty {
        VyperType::Bytes { .. } | VyperType::String { .. } => {
            let len = ctx.builder.mload(src.clone());
            ctx.builder.mstore(len, dst.clone());
            let padded = ctx.ceil32_op(len);
            let data_src = ctx.builder.add(src.clone(), 32u64);
            let data_dst = ctx.builder.add(dst.clone(), 32u64);
            ctx.copy_memory_dynamic(data_dst, data_src, padded);
            Ok(ctx.builder.add(padded, 32u64).into())
        }
        VyperType::DArray { elem, .. } => {
            let n = ctx.builder.mload(src.clone());
            ctx.builder.mstore(n, dst.clone());
            let elem_abi = elem.abi_type();
            if elem_abi.is_dynamic() {
                encode_dynarray_dynamic_elems(ctx, dst, src, elem, n)
            } else {
                // packed elements copy straight through
                let body = ctx.builder.mul(n, elem_abi.static_size());
                let data_src = ctx.builder.add(src.clone(), 32u64);
                let data_dst = ctx.builder.add(dst.clone(), 32u64);
                ctx.copy_memory_dynamic(data_dst, data_src, body);
                Ok(ctx.builder.add(body, 32u64).into())
            }
        }
        VyperType::Tuple { members } => encode_members(ctx, dst, src, members),
        VyperType::Struct { fields, .. } => {
            let members: Vec<VyperType> = fields.iter().map(|f| f.ty.clone()).collect();
            encode_members(ctx, dst, src, &members)
        }
        VyperType::SArray { elem, n } => {
            let members: Vec<VyperType> = std::iter::repeat_with(|| (**elem).clone())
                .take(*n)
                .collect();
            encode_members(ctx, dst, src, &members)
        }
        other => Err(CodegenError::panic(format!("cannot abi-encode {other:?}"))),
    }
}

/// Head-tail encoding of a product type with at least one dynamic member.
fn encode_members(
    ctx: &mut CodegenContext,
    dst: &IROperand,
    src: &IROperand,
    members: &[VyperType],
) -> CodegenResult<IROperand> {
    let head_size: usize = members
        .iter()
        .map(|m| m.abi_type().embedded_static_size())
        .sum();

    // runtime tail cursor, relative to the head start
    let ofst = ctx.builder.new_variable();
    ctx.builder.assign_to(IROperand::from(head_size), ofst);

    let mut head_ofst = 0usize;
    let mut mem_ofst = 0usize;
    for member in members {
        let member_src = add_literal(ctx, src, mem_ofst);
        let abi_t = member.abi_type();
        if abi_t.is_dynamic() {
            let head_dst = add_literal(ctx, dst, head_ofst);
            ctx.builder.mstore(ofst, head_dst);
            let tail_dst = ctx.builder.add(dst.clone(), ofst);
            let written = encode_r(ctx, &tail_dst.into(), &member_src, member)?;
            let next = ctx.builder.add(ofst, written);
            ctx.builder.assign_to(next, ofst);
        } else {
            let head_dst = add_literal(ctx, dst, head_ofst);
            encode_r(ctx, &head_dst, &member_src, member)?;
        }
        head_ofst += abi_t.embedded_static_size();
        mem_ofst += member.memory_bytes_required();
    }
    Ok(ofst.into())
}

/// Element loop for `DynArray[T, N]` where `T` is itself dynamic: write
/// one offset slot per element, then each element's tail in order.
fn encode_dynarray_dynamic_elems(
    ctx: &mut CodegenContext,
    dst: &IROperand,
    src: &IROperand,
    elem: &VyperType,
    n: IRVariable,
) -> CodegenResult<IROperand> {
    let elem_stride = elem.memory_bytes_required();
    let heads = ctx.builder.add(dst.clone(), 32u64);
    let elems_src = ctx.builder.add(src.clone(), 32u64);

    // tail cursor, relative to the start of the element area
    let ofst = ctx.builder.new_variable();
    let head_bytes = ctx.builder.mul(n, 32u64);
    ctx.builder.assign_to(head_bytes, ofst);

    let elem = elem.clone();
    ctx.counted_loop(n, |ctx, i| {
        let head_slot_ofst = ctx.builder.mul(i, 32u64);
        let head_slot = ctx.builder.add(heads, head_slot_ofst);
        ctx.builder.mstore(ofst, head_slot);

        let src_ofst = ctx.builder.mul(i, elem_stride);
        let elem_src = ctx.builder.add(elems_src, src_ofst);
        let tail_dst = ctx.builder.add(heads, ofst);
        let written = encode_r(ctx, &tail_dst.into(), &elem_src.into(), &elem)?;
        let next = ctx.builder.add(ofst, written);
        ctx.builder.assign_to(next, ofst);
        Ok(())
    })?;

    Ok(ctx.builder.add(ofst, 32u64).into())
}

/// Decodes the encoded value at `src` into Vyper memory layout at `dst`.
///
/// `hi` is the exclusive upper bound of the encoded buffer; every dynamic
/// read is re-validated against it and reverts on overrun. Word values
/// are clamped to their type on the way through.
pub fn abi_decode_to_buf(
    ctx: &mut CodegenContext,
    dst: &IROperand,
    src: &Ptr,
    ty: &VyperType,
    hi: &IROperand,
) -> CodegenResult<()> {
    decode_r(ctx, dst, src, ty, hi)
}

fn decode_r(
    ctx: &mut CodegenContext,
    dst: &IROperand,
    src: &Ptr,
    ty: &VyperType,
    hi: &IROperand,
) -> CodegenResult<()> {
    if ty.is_prim_word() {
        let val = ctx.ptr_load(src)?;
        decode_clamp(ctx, val, ty)?;
        ctx.builder.mstore(val, dst.clone());
        return Ok(());
    }

    match ty {
        VyperType::Bytes { maxlen } | VyperType::String { maxlen } => {
            let len = ctx.ptr_load(src)?;
            let oversize = ctx.builder.gt(len, *maxlen);
            let len_ok = ctx.builder.iszero(oversize);
            ctx.builder.assert_(len_ok);

            // payload must stay inside the encoded buffer
            let padded = ctx.ceil32_op(len);
            let payload_start = ctx.builder.add(src.operand.clone(), 32u64);
            let end = ctx.builder.add(payload_start, padded);
            let oob = ctx.builder.gt(end, hi.clone());
            let in_bounds = ctx.builder.iszero(oob);
            ctx.builder.assert_(in_bounds);

            ctx.builder.mstore(len, dst.clone());
            let data_dst = ctx.builder.add(dst.clone(), 32u64);
            copy_from_location(ctx, data_dst.into(), src, 32, padded.into());
            Ok(())
        }
        VyperType::DArray { elem, maxlen } => {
            let n = ctx.ptr_load(src)?;
            let oversize = ctx.builder.gt(n, *maxlen);
            let n_ok = ctx.builder.iszero(oversize);
            ctx.builder.assert_(n_ok);
            ctx.builder.mstore(n, dst.clone());

            let elem_abi = elem.abi_type();
            let dst_stride = elem.memory_bytes_required();
            let elem_area = ctx.add_offset(src, 32usize);
            if elem_abi.is_dynamic() {
                let elem_min = elem_abi.min_size();
                let elem = (**elem).clone();
                let dst = dst.clone();
                let hi = hi.clone();
                ctx.counted_loop(n, move |ctx, i| {
                    let head_ofst = ctx.builder.mul(i, 32u64);
                    let head_ptr = ctx.add_offset(&elem_area, head_ofst);
                    let rel = ctx.ptr_load(&head_ptr)?;
                    let child = ctx.add_offset(&elem_area, rel);
                    check_child_bound(ctx, &child, elem_min, &hi);

                    let dst_ofst = ctx.builder.mul(i, dst_stride);
                    let elem_dst = ctx.builder.add(dst.clone(), 32u64);
                    let elem_dst = ctx.builder.add(elem_dst, dst_ofst);
                    decode_r(ctx, &elem_dst.into(), &child, &elem, &hi)
                })
            } else {
                // bound the whole packed element region at once
                let src_stride = elem_abi.static_size();
                let body = ctx.builder.mul(n, src_stride);
                let end = ctx.builder.add(elem_area.operand.clone(), body);
                let oob = ctx.builder.gt(end, hi.clone());
                let in_bounds = ctx.builder.iszero(oob);
                ctx.builder.assert_(in_bounds);

                let elem = (**elem).clone();
                let dst = dst.clone();
                let hi = hi.clone();
                ctx.counted_loop(n, move |ctx, i| {
                    let src_ofst = ctx.builder.mul(i, src_stride);
                    let elem_src = ctx.add_offset(&elem_area, src_ofst);
                    let dst_ofst = ctx.builder.mul(i, dst_stride);
                    let elem_dst = ctx.builder.add(dst.clone(), 32u64);
                    let elem_dst = ctx.builder.add(elem_dst, dst_ofst);
                    decode_r(ctx, &elem_dst.into(), &elem_src, &elem, &hi)
                })
            }
        }
        VyperType::Tuple { members } => decode_members(ctx, dst, src, members, hi),
        VyperType::Struct { fields, .. } => {
            let members: Vec<VyperType> = fields.iter().map(|f| f.ty.clone()).collect();
            decode_members(ctx, dst, src, &members, hi)
        }
        VyperType::SArray { elem, n } => {
            let members: Vec<VyperType> = std::iter::repeat_with(|| (**elem).clone())
                .take(*n)
                .collect();
            decode_members(ctx, dst, src, &members, hi)
        }
        other => Err(CodegenError::panic(format!("cannot abi-decode {other:?}"))),
    }
}

fn decode_members(
    ctx: &mut CodegenContext,
    dst: &IROperand,
    src: &Ptr,
    members: &[VyperType],
    hi: &IROperand,
) -> CodegenResult<()> {
    let mut head_ofst = 0usize;
    let mut mem_ofst = 0usize;
    for member in members {
        let member_dst = add_literal(ctx, dst, mem_ofst);
        let abi_t = member.abi_type();
        if abi_t.is_dynamic() {
            // follow the offset slot into the tail
            let head_ptr = ctx.add_offset(src, head_ofst);
            let rel = ctx.ptr_load(&head_ptr)?;
            let child = ctx.add_offset(src, rel);
            check_child_bound(ctx, &child, abi_t.min_size(), hi);
            decode_r(ctx, &member_dst, &child, member, hi)?;
        } else {
            let member_src = ctx.add_offset(src, head_ofst);
            decode_r(ctx, &member_dst, &member_src, member, hi)?;
        }
        head_ofst += abi_t.embedded_static_size();
        mem_ofst += member.memory_bytes_required();
    }
    Ok(())
}

/// Asserts a dynamic child's minimal extent fits below `hi`.
fn check_child_bound(ctx: &mut CodegenContext, child: &Ptr, min_size: usize, hi: &IROperand) {
    let end = ctx.builder.add(child.operand.clone(), min_size);
    let oob = ctx.builder.gt(end, hi.clone());
    let in_bounds = ctx.builder.iszero(oob);
    ctx.builder.assert_(in_bounds);
}

/// Runtime clamps applied to decoded words.
fn decode_clamp(ctx: &mut CodegenContext, val: IRVariable, ty: &VyperType) -> CodegenResult<()> {
    match ty {
        VyperType::Bool => {
            let b = &mut ctx.builder;
            let too_big = b.gt(val, 1u64);
            let ok = b.iszero(too_big);
            b.assert_(ok);
        }
        VyperType::Address | VyperType::Interface { .. } => {
            let mask = (BigInt::one() << 160) - 1;
            let b = &mut ctx.builder;
            let too_big = b.gt(val, mask);
            let ok = b.iszero(too_big);
            b.assert_(ok);
        }
        VyperType::Integer(t) if t.bits < 256 => {
            ctx.clamp_basetype(val.into(), ty)?;
        }
        VyperType::Decimal => {
            ctx.clamp_basetype(val.into(), ty)?;
        }
        VyperType::BytesM(m) if *m < 32 => {
            // trailing bytes beyond the declared width must be zero
            let mask = (BigInt::one() << (256 - 8 * u32::from(*m))) - 1;
            let b = &mut ctx.builder;
            let trailing = b.and(val, mask);
            let ok = b.iszero(trailing);
            b.assert_(ok);
        }
        VyperType::Flag { members, .. } => {
            let bound = BigInt::one() << members.len();
            let b = &mut ctx.builder;
            let ok = b.lt(val, bound);
            b.assert_(ok);
        }
        _ => {}
    }
    Ok(())
}

/// Copies `size` bytes from `src + skip` (in its own location) to memory.
fn copy_from_location(
    ctx: &mut CodegenContext,
    dst: IROperand,
    src: &Ptr,
    skip: usize,
    size: IROperand,
) {
    let from = ctx.add_offset(src, skip);
    match src.location {
        DataLocation::Calldata => ctx.builder.calldatacopy(size, from.operand, dst),
        DataLocation::Code => ctx.builder.dloadbytes(size, from.operand, dst),
        _ => ctx.copy_memory_dynamic(dst, from.operand, size),
    }
}

fn add_literal(ctx: &mut CodegenContext, base: &IROperand, offset: usize) -> IROperand {
    if offset == 0 {
        return base.clone();
    }
    if let Some(lit) = base.as_literal() {
        return IROperand::literal(lit.to_signed() + BigInt::from(offset));
    }
    IROperand::Variable(ctx.builder.add(base.clone(), offset))
}
