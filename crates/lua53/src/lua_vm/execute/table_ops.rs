/// Indexing with `__index` / `__newindex` chains
///
/// Raw access first; on a miss the chain is followed until a value is
/// found or a function handler is called. Chains are bounded by
/// `SafeOption::max_meta_depth`.
use crate::lua_value::{LuaTableRef, LuaValue};
use crate::lua_vm::execute::TmKind;
use crate::lua_vm::{ErrorKind, FinishOp, LuaResult, LuaVM};

impl LuaVM {
    /// `t[key]` with metamethods.
    pub fn get_table(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
        let mut t = obj.clone();
        for _ in 0..self.options.max_meta_depth {
            let tm = match &t {
                LuaValue::Table(tbl) => {
                    let tbl = tbl.borrow();
                    let v = tbl.get(key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let Some(mt) = tbl.metatable() else {
                        return Ok(LuaValue::Nil);
                    };
                    let tm = mt.borrow().get_str(TmKind::Index.name());
                    if tm.is_nil() {
                        return Ok(LuaValue::Nil);
                    }
                    tm
                }
                other => {
                    let tm = self.get_tm(other, TmKind::Index);
                    if tm.is_nil() {
                        return Err(self.type_error(other, "index"));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm_res(tm, t, key.clone(), FinishOp::Store);
            }
            t = tm;
        }
        Err(self.rt_error(ErrorKind::Depth, "'__index' chain too long; possible loop"))
    }

    /// `t[key] = value` with metamethods.
    pub fn set_table(&mut self, obj: &LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let mut t = obj.clone();
        for _ in 0..self.options.max_meta_depth {
            let tm = match &t {
                LuaValue::Table(tbl) => {
                    let tm = {
                        let b = tbl.borrow();
                        match b.metatable() {
                            Some(mt) if b.get(&key).is_nil() => mt.borrow().get_str(TmKind::NewIndex.name()),
                            _ => LuaValue::Nil,
                        }
                    };
                    if tm.is_nil() {
                        return self.raw_set(tbl, key, value);
                    }
                    tm
                }
                other => {
                    let tm = self.get_tm(other, TmKind::NewIndex);
                    if tm.is_nil() {
                        return Err(self.type_error(other, "index"));
                    }
                    tm
                }
            };
            if tm.is_function() {
                self.call_tm(tm, vec![t, key, value], FinishOp::Discard)?;
                return Ok(());
            }
            t = tm;
        }
        Err(self.rt_error(ErrorKind::Depth, "'__newindex' chain too long; possible loop"))
    }

    /// `rawset`, reporting nil and NaN keys.
    pub fn raw_set(&self, tbl: &LuaTableRef, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let res = tbl.borrow_mut().set(key, value);
        res.map_err(|e| self.rt_error(ErrorKind::KeyError, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::lua_value::LuaValue;
    use crate::lua_vm::{ErrorKind, LuaVM};

    #[test]
    fn test_index_chain_through_tables() {
        let mut vm = LuaVM::default();
        let base = vm.new_table_size(0, 1);
        let mid = vm.new_table_size(0, 1);
        let top = vm.new_table_size(0, 0);
        vm.set_table(&base, LuaValue::from("x"), LuaValue::Integer(9)).unwrap();
        let mt_mid = vm.new_table_size(0, 1);
        vm.set_table(&mt_mid, LuaValue::from("__index"), base.clone()).unwrap();
        vm.set_metatable(&mid, mt_mid.as_table().cloned());
        let mt_top = vm.new_table_size(0, 1);
        vm.set_table(&mt_top, LuaValue::from("__index"), mid.clone()).unwrap();
        vm.set_metatable(&top, mt_top.as_table().cloned());

        let v = vm.get_table(&top, &LuaValue::from("x")).unwrap();
        assert!(matches!(v, LuaValue::Integer(9)));
        let v = vm.get_table(&top, &LuaValue::from("y")).unwrap();
        assert!(v.is_nil());
    }

    #[test]
    fn test_index_loop_is_bounded() {
        let mut vm = LuaVM::default();
        let t = vm.new_table_size(0, 0);
        let mt = vm.new_table_size(0, 1);
        vm.set_table(&mt, LuaValue::from("__index"), t.clone()).unwrap();
        // t's __index is t itself: every step misses again
        vm.set_metatable(&t, mt.as_table().cloned());
        let err = vm.get_table(&t, &LuaValue::from("k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Depth);
        assert!(err.to_string().contains("'__index' chain too long"));
    }

    #[test]
    fn test_nil_key_rejected() {
        let mut vm = LuaVM::default();
        let t = vm.new_table_size(0, 0);
        let err = vm.set_table(&t, LuaValue::Nil, LuaValue::Integer(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyError);
        assert_eq!(err.to_string(), "table index is nil");
        let err = vm.set_table(&t, LuaValue::Float(f64::NAN), LuaValue::Integer(1)).unwrap_err();
        assert_eq!(err.to_string(), "table index is NaN");
    }
}
