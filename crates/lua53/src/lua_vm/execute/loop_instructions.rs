/// Numeric for loop
///
/// Integer loops precompute the iteration count so the control variable
/// can never overflow; R[A+1] holds the remaining count. Float loops keep
/// the limit in R[A+1] and compare on every iteration.
use crate::lua_value::LuaValue;
use crate::lua_value::lua_convert::{float_to_integer, to_float, to_number};
use crate::lua_vm::{ErrorKind, LuaResult, LuaVM};

/// Integer limit of a loop with integer `init` and `step`; `None` when
/// the loop must be skipped.
fn for_limit(init: i64, limit: &LuaValue, step: i64) -> Option<Option<i64>> {
    let flim = match limit {
        LuaValue::Integer(i) => return Some(runs(init, *i, step).then_some(*i)),
        other => match to_number(other)? {
            LuaValue::Integer(i) => return Some(runs(init, i, step).then_some(i)),
            LuaValue::Float(f) => f,
            _ => return None,
        },
    };
    if flim.is_nan() {
        return Some(None);
    }
    let rounded = if step < 0 { flim.ceil() } else { flim.floor() };
    let lim = match float_to_integer(rounded) {
        Some(i) => i,
        None if flim > 0.0 => {
            if step < 0 {
                return Some(None);
            }
            i64::MAX
        }
        None => {
            if step > 0 {
                return Some(None);
            }
            i64::MIN
        }
    };
    Some(runs(init, lim, step).then_some(lim))
}

#[inline]
fn runs(init: i64, limit: i64, step: i64) -> bool {
    if step > 0 { init <= limit } else { init >= limit }
}

impl LuaVM {
    /// FORPREP A sBx
    /// Returns false when the body must be skipped.
    pub(crate) fn for_prep(&mut self, ra: usize) -> LuaResult<bool> {
        let init = self.state.stack[ra].clone();
        let limit = self.state.stack[ra + 1].clone();
        let step = self.state.stack[ra + 2].clone();

        if let (LuaValue::Integer(init), LuaValue::Integer(step)) = (&init, &step) {
            let (init, step) = (*init, *step);
            if step == 0 {
                return Err(self.rt_error(ErrorKind::Type, "'for' step is zero"));
            }
            let Some(lim) = for_limit(init, &limit, step) else {
                return Err(self.rt_error(ErrorKind::Type, "'for' limit must be a number"));
            };
            let Some(lim) = lim else {
                return Ok(false);
            };
            let count = if step > 0 {
                (lim as u64).wrapping_sub(init as u64) / step as u64
            } else {
                // -(step + 1) + 1 avoids negating i64::MIN
                let s = (-(step + 1)) as u64 + 1;
                (init as u64).wrapping_sub(lim as u64) / s
            };
            let stack = &mut self.state.stack;
            stack[ra] = LuaValue::Integer(init);
            stack[ra + 1] = LuaValue::Integer(count as i64);
            stack[ra + 3] = LuaValue::Integer(init);
            return Ok(true);
        }

        let Some(flimit) = to_float(&limit) else {
            return Err(self.rt_error(ErrorKind::Type, "'for' limit must be a number"));
        };
        let Some(fstep) = to_float(&step) else {
            return Err(self.rt_error(ErrorKind::Type, "'for' step must be a number"));
        };
        let Some(finit) = to_float(&init) else {
            return Err(self.rt_error(ErrorKind::Type, "'for' initial value must be a number"));
        };
        if fstep == 0.0 {
            return Err(self.rt_error(ErrorKind::Type, "'for' step is zero"));
        }
        let skip = if fstep > 0.0 {
            !(finit <= flimit)
        } else {
            !(flimit <= finit)
        };
        if skip {
            return Ok(false);
        }
        let stack = &mut self.state.stack;
        stack[ra] = LuaValue::Float(finit);
        stack[ra + 1] = LuaValue::Float(flimit);
        stack[ra + 2] = LuaValue::Float(fstep);
        stack[ra + 3] = LuaValue::Float(finit);
        Ok(true)
    }

    /// FORLOOP A sBx
    /// Returns true when the loop continues.
    #[inline(always)]
    pub(crate) fn for_loop(&mut self, ra: usize) -> bool {
        let stack = &mut self.state.stack;
        match (&stack[ra], &stack[ra + 1], &stack[ra + 2]) {
            (LuaValue::Integer(idx), LuaValue::Integer(count), LuaValue::Integer(step)) => {
                let count = *count as u64;
                if count == 0 {
                    return false;
                }
                let idx = idx.wrapping_add(*step);
                stack[ra] = LuaValue::Integer(idx);
                stack[ra + 1] = LuaValue::Integer((count - 1) as i64);
                stack[ra + 3] = LuaValue::Integer(idx);
                true
            }
            (LuaValue::Float(idx), LuaValue::Float(limit), LuaValue::Float(step)) => {
                let idx = idx + step;
                let more = if *step > 0.0 { idx <= *limit } else { *limit <= idx };
                if more {
                    stack[ra] = LuaValue::Float(idx);
                    stack[ra + 3] = LuaValue::Float(idx);
                }
                more
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_limit_clamps_floats() {
        assert_eq!(for_limit(1, &LuaValue::Float(3.5), 1), Some(Some(3)));
        assert_eq!(for_limit(1, &LuaValue::Float(-0.5), -1), Some(Some(0)));
        assert_eq!(for_limit(1, &LuaValue::Float(1e300), 1), Some(Some(i64::MAX)));
        assert_eq!(for_limit(1, &LuaValue::Float(1e300), -1), Some(None));
        assert_eq!(for_limit(1, &LuaValue::Float(f64::NAN), 1), Some(None));
        assert_eq!(for_limit(5, &LuaValue::Integer(1), 1), Some(None));
        assert_eq!(for_limit(1, &LuaValue::Boolean(true), 1), None);
    }
}
