//! Safe arithmetic lowering.
//!
//! Every checked operator follows the same recipe: perform the 256-bit
//! operation, then emit the assertion that rules out wrap, overflow, or a
//! forbidden divisor. Sub-256-bit widths compute in 256 bits and clamp
//! the result against the type's bounds. Shared by binary expressions and
//! augmented assignment.

use num_bigint::BigInt;
use num_traits::{One, Signed};

use crate::{
    ast::ExprNode,
    codegen::context::CodegenContext,
    errors::{CodegenError, CodegenResult},
    types::{DECIMAL_DIVISOR, VyperType, int_bounds},
    venom::IROperand,
};

impl CodegenContext<'_, '_> {
    /// Checked addition.
    pub fn safe_add(&mut self, x: IROperand, y: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        let b = &mut self.builder;
        let res = b.add(x.clone(), y.clone());

        if ty.int_bounds().is_some() && ty.bits() < 256 {
            return self.clamp_basetype(res.into(), ty);
        }

        if ty.int_bounds().is_some() {
            let ok = if ty.is_signed() {
                // adding a negative must decrease the result and vice versa
                let y_neg = b.slt(y, 0i64);
                let res_lt_x = b.slt(res, x);
                b.eq(y_neg, res_lt_x)
            } else {
                let wrapped = b.lt(res, x);
                b.iszero(wrapped)
            };
            b.assert_(ok);
        }
        Ok(res.into())
    }

    /// Checked subtraction.
    pub fn safe_sub(&mut self, x: IROperand, y: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        let b = &mut self.builder;
        let res = b.sub(x.clone(), y.clone());

        if ty.int_bounds().is_some() && ty.bits() < 256 {
            return self.clamp_basetype(res.into(), ty);
        }

        if ty.int_bounds().is_some() {
            let ok = if ty.is_signed() {
                let y_neg = b.slt(y, 0i64);
                let res_gt_x = b.sgt(res, x);
                b.eq(y_neg, res_gt_x)
            } else {
                let wrapped = b.gt(res, x);
                b.iszero(wrapped)
            };
            b.assert_(ok);
        }
        Ok(res.into())
    }

    /// Checked multiplication. Decimals divide the double-scaled product
    /// back down before clamping.
    pub fn safe_mul(&mut self, x: IROperand, y: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        let is_signed = ty.is_signed();
        let is_decimal = matches!(ty, VyperType::Decimal);
        let b = &mut self.builder;
        let mut res: IROperand = b.mul(x.clone(), y.clone()).into();

        if ty.int_bounds().is_some() {
            if ty.bits() > 128 {
                // quotient check: res / y == x, unless y == 0
                let quotient = if is_signed {
                    b.sdiv(res.clone(), y.clone())
                } else {
                    b.div(res.clone(), y.clone())
                };
                let div_check = b.eq(quotient, x.clone());
                let y_zero = b.iszero(y.clone());
                let mut ok = b.or(div_check, y_zero);

                if is_signed && ty.bits() == 256 {
                    // MIN_INT256 * -1 passes the quotient check but wraps
                    let min_int = BigInt::one() << 255u16;
                    let x_is_min = b.eq(x, min_int);
                    let not_y = b.not(y);
                    let y_is_neg1 = b.iszero(not_y);
                    let special_case = b.and(x_is_min, y_is_neg1);
                    let not_special = b.iszero(special_case);
                    ok = b.and(ok, not_special);
                }
                b.assert_(ok);
            }

            if is_decimal {
                let scaled = if is_signed {
                    b.sdiv(res, DECIMAL_DIVISOR)
                } else {
                    b.div(res, DECIMAL_DIVISOR)
                };
                res = scaled.into();
            }

            if ty.bits() < 256 || is_decimal {
                res = self.clamp_basetype(res, ty)?;
            }
        }
        Ok(res)
    }

    /// Checked decimal division (the `/` operator).
    pub fn safe_div(&mut self, x: IROperand, y: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        if !matches!(ty, VyperType::Decimal) {
            return Err(CodegenError::panic("/ operator only valid for decimals"));
        }
        let b = &mut self.builder;
        let x_scaled = b.mul(x, DECIMAL_DIVISOR);
        b.assert_(y.clone());
        let res = b.sdiv(x_scaled, y);
        self.clamp_basetype(res.into(), ty)
    }

    /// Checked integer floor division (the `//` operator).
    pub fn safe_floordiv(&mut self, x: IROperand, y: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        let VyperType::Integer(int_t) = ty else {
            return Err(CodegenError::panic("// operator only valid for integers"));
        };
        let b = &mut self.builder;
        b.assert_(y.clone());

        let res = if int_t.signed {
            b.sdiv(x.clone(), y.clone())
        } else {
            b.div(x.clone(), y.clone())
        };

        if int_t.signed && int_t.bits == 256 {
            let min_int = BigInt::one() << 255u16;
            let x_is_min = b.eq(x, min_int);
            let not_y = b.not(y);
            let y_is_neg1 = b.iszero(not_y);
            let special_case = b.and(x_is_min, y_is_neg1);
            let ok = b.iszero(special_case);
            b.assert_(ok);
            Ok(res.into())
        } else if int_t.signed && int_t.bits < 256 {
            self.clamp_basetype(res.into(), ty)
        } else {
            Ok(res.into())
        }
    }

    /// Checked modulo.
    pub fn safe_mod(&mut self, x: IROperand, y: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        let VyperType::Integer(int_t) = ty else {
            return Err(CodegenError::panic("% operator only valid for integers"));
        };
        let b = &mut self.builder;
        b.assert_(y.clone());
        let res = if int_t.signed {
            b.smod(x, y)
        } else {
            b.modulo(x, y)
        };
        Ok(res.into())
    }

    /// Checked exponentiation.
    ///
    /// The pre-check depends on which operand is a literal: a literal
    /// exponent bounds the base, a literal base bounds the exponent. When
    /// neither is a literal, only the trivially safe combinations (base or
    /// exponent in {0, 1}) pass the runtime assertion.
    pub fn safe_pow(
        &mut self,
        x: IROperand,
        y: IROperand,
        ty: &VyperType,
        left_node: &ExprNode,
        right_node: &ExprNode,
    ) -> CodegenResult<IROperand> {
        let VyperType::Integer(int_t) = ty else {
            return Err(CodegenError::type_check_at(
                "pow only valid for integers",
                right_node.span,
            ));
        };

        if let Some(exp_val) = right_node.as_int_literal() {
            if exp_val.is_negative() {
                return Err(CodegenError::type_check_at(
                    "negative exponent",
                    right_node.span,
                ));
            }
            if exp_val > BigInt::from(u32::MAX) {
                return Err(CodegenError::type_check_at(
                    "exponent out of range",
                    right_node.span,
                ));
            }
            let exp = u32::try_from(&exp_val).expect("checked above");
            if exp > 1 {
                let (lower, upper) = calculate_largest_base(exp, int_t.bits, int_t.signed);
                let b = &mut self.builder;
                let ok = if int_t.signed {
                    let below = b.slt(x.clone(), lower);
                    let ge_lower = b.iszero(below);
                    let above = b.sgt(x.clone(), upper);
                    let le_upper = b.iszero(above);
                    b.and(ge_lower, le_upper)
                } else {
                    let above = b.gt(x.clone(), upper);
                    b.iszero(above)
                };
                b.assert_(ok);
            }
        } else if let Some(base_val) = left_node.as_int_literal() {
            if base_val.magnitude() > &num_bigint::BigUint::one() {
                let max_exp = calculate_largest_power(&base_val, int_t.bits, int_t.signed);
                let b = &mut self.builder;
                let above = b.gt(y.clone(), max_exp);
                let ok = b.iszero(above);
                b.assert_(ok);
            }
        } else {
            // no literal operand: accept only the always-safe cases
            let b = &mut self.builder;
            let exp_zero = b.iszero(y.clone());
            let exp_one = b.eq(y.clone(), 1u64);
            let exp_trivial = b.or(exp_zero, exp_one);
            let base_zero = b.iszero(x.clone());
            let base_one = b.eq(x.clone(), 1u64);
            let base_trivial = b.or(base_zero, base_one);
            let ok = b.or(exp_trivial, base_trivial);
            b.assert_(ok);
        }

        Ok(self.builder.exp(x, y).into())
    }

    /// Asserts that a 256-bit result lies within the type's bounds.
    pub fn clamp_basetype(&mut self, val: IROperand, ty: &VyperType) -> CodegenResult<IROperand> {
        let Some((lo, hi)) = ty.int_bounds() else {
            return Err(CodegenError::panic("clamp on non-integer type"));
        };
        let b = &mut self.builder;
        let ok = if ty.is_signed() {
            let below = b.slt(val.clone(), lo);
            let ge_lo = b.iszero(below);
            let above = b.sgt(val.clone(), hi);
            let le_hi = b.iszero(above);
            b.and(ge_lo, le_hi)
        } else {
            let above = b.gt(val.clone(), hi);
            b.iszero(above)
        };
        b.assert_(ok);
        Ok(val)
    }

    /// Wraps an unchecked 256-bit result back into a narrower type:
    /// mask for unsigned, sign-extend for signed.
    pub fn wrap_result(&mut self, val: IROperand, ty: &VyperType) -> IROperand {
        if ty.bits() >= 256 {
            return val;
        }
        let b = &mut self.builder;
        if ty.is_signed() {
            let byte_width = usize::from(ty.bits() / 8 - 1);
            b.signextend(byte_width, val).into()
        } else {
            let mask = (BigInt::one() << ty.bits()) - 1;
            b.and(val, mask).into()
        }
    }
}

/// Largest (and, for signed types, smallest) base `b` such that `b^exp`
/// stays within the type's bounds.
///
/// For even exponents the negative bound mirrors the positive one; for
/// odd exponents it is the root of the type minimum.
#[must_use]
pub fn calculate_largest_base(exp: u32, bits: u16, signed: bool) -> (BigInt, BigInt) {
    debug_assert!(exp >= 2);
    let (lo_bound, hi_bound) = int_bounds(bits, signed);

    let mut hi = hi_bound.nth_root(exp);
    while hi.clone().pow(exp) > hi_bound {
        hi -= 1;
    }

    let lo = if !signed {
        BigInt::ZERO
    } else if exp % 2 == 0 {
        -hi.clone()
    } else {
        let mut root = lo_bound.magnitude().nth_root(exp);
        while BigInt::from(root.clone()).pow(exp) > -(&lo_bound) {
            root -= 1u32;
        }
        -BigInt::from(root)
    };
    (lo, hi)
}

/// Largest exponent `e` such that `base^e` stays within the type's
/// bounds. `base` must have magnitude greater than one.
#[must_use]
pub fn calculate_largest_power(base: &BigInt, bits: u16, signed: bool) -> BigInt {
    debug_assert!(base.magnitude() > &num_bigint::BigUint::one());
    let (lo_bound, hi_bound) = int_bounds(bits, signed);

    let mut exp = BigInt::ZERO;
    let mut acc = base.clone();
    loop {
        let next = &acc * base;
        let fits = if next.is_negative() {
            next >= lo_bound
        } else {
            next <= hi_bound
        };
        if !fits {
            break;
        }
        acc = next;
        exp += 1;
    }
    exp + 1
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn largest_base_uint256_square() {
        let (lo, hi) = calculate_largest_base(2, 256, false);
        assert_eq!(lo, BigInt::ZERO);
        // floor(sqrt(2^256 - 1)) == 2^128 - 1
        assert_eq!(hi, (BigInt::one() << 128u16) - 1);
    }

    #[test]
    fn largest_base_is_tight() {
        for (exp, bits, signed) in [(2u32, 8u16, false), (3, 16, true), (5, 256, true)] {
            let (lo, hi) = calculate_largest_base(exp, bits, signed);
            let (ty_lo, ty_hi) = int_bounds(bits, signed);
            assert!(hi.clone().pow(exp) <= ty_hi);
            assert!((hi.clone() + BigInt::one()).pow(exp) > ty_hi);
            if signed {
                let low_pow = lo.clone().pow(exp);
                assert!(low_pow >= ty_lo && low_pow <= ty_hi, "lo^exp out of range");
                let beyond = (lo.clone() - BigInt::one()).pow(exp);
                assert!(beyond < ty_lo || beyond > ty_hi, "lo not tight");
            }
        }
    }

    #[test]
    fn largest_power_base_two() {
        assert_eq!(calculate_largest_power(&BigInt::from(2), 8, false), BigInt::from(7));
        assert_eq!(
            calculate_largest_power(&BigInt::from(2), 256, false),
            BigInt::from(255)
        );
        assert_eq!(calculate_largest_power(&BigInt::from(10), 8, false), BigInt::from(2));
    }

    #[test]
    fn largest_power_negative_base() {
        // (-2)^7 == -128 fits int8, (-2)^8 == 256 does not
        assert_eq!(calculate_largest_power(&BigInt::from(-2), 8, true), BigInt::from(7));
    }
}
