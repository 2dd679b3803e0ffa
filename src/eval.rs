// FRMEVL: precedence climbing over typed values. Numbers ride as doubles
// until they are stored; strings ride as slots on the temporary descriptor
// stack so the collector can always find them. Relational operators fold
// into a three-bit mask before they are applied, which is how <> and >=
// come out of the three individual tokens.

use crate::errors::{Error, Result};
use crate::float;
use crate::interpreter::Interpreter;
use crate::memory::RAM_SIZE;
use crate::strings::{self, Desc};
use crate::tokens::{Token, PREC_REL, PREC_UNARY};
use crate::vars::{self, Name};
use std::cmp::Ordering;
use std::convert::TryFrom;

#[derive(Copy, Clone)]
pub(crate) enum Value {
    Num(f64),
    Str(usize),
}

pub(crate) enum Lvalue {
    Simple { entry: u16, is_string: bool },
    Array { name: Name, is_string: bool, indices: Vec<u16> },
    TiString,
}

impl Lvalue {
    pub fn is_string(&self) -> bool {
        match self {
            Lvalue::Simple { is_string, .. } | Lvalue::Array { is_string, .. } => *is_string,
            Lvalue::TiString => true,
        }
    }
}

impl Interpreter {
    pub(crate) fn eval_expr(&mut self) -> Result<Value> {
        self.eval_binary(0)
    }

    pub(crate) fn eval_num(&mut self) -> Result<f64> {
        match self.eval_expr()? {
            Value::Num(x) => Ok(x),
            Value::Str(_) => Err(Error::TypeMismatch),
        }
    }

    pub(crate) fn eval_str(&mut self) -> Result<usize> {
        match self.eval_expr()? {
            Value::Str(id) => Ok(id),
            Value::Num(_) => Err(Error::TypeMismatch),
        }
    }

    fn eval_binary(&mut self, min_prec: u8) -> Result<Value> {
        let mut lhs = self.eval_unary()?;
        loop {
            let token = match Token::try_from(self.cur()) {
                Ok(token) => token,
                Err(_) => break,
            };
            if matches!(token, Token::Greater | Token::Equal | Token::Less) {
                if PREC_REL < min_prec {
                    break;
                }
                let mask = self.relation_mask()?;
                let rhs = self.eval_binary(PREC_REL + 1)?;
                lhs = self.apply_relation(mask, lhs, rhs)?;
                continue;
            }
            let (prec, right_assoc) = match token.binary_precedence() {
                Some(p) => p,
                None => break,
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.eval_binary(if right_assoc { prec } else { prec + 1 })?;
            lhs = self.apply_binary(token, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn relation_mask(&mut self) -> Result<u8> {
        let mut mask = 0u8;
        loop {
            let bit = match Token::try_from(self.cur()) {
                Ok(Token::Greater) => 1,
                Ok(Token::Equal) => 2,
                Ok(Token::Less) => 4,
                _ => break,
            };
            if mask & bit != 0 {
                return Err(Error::Syntax);
            }
            mask |= bit;
            self.bump();
        }
        Ok(mask)
    }

    fn unary_operand(&mut self) -> Result<f64> {
        match self.eval_binary(PREC_UNARY)? {
            Value::Num(x) => Ok(x),
            Value::Str(_) => Err(Error::TypeMismatch),
        }
    }

    fn eval_unary(&mut self) -> Result<Value> {
        let b = self.cur();
        if b == u8::from(Token::Minus) {
            self.bump();
            let x = self.unary_operand()?;
            return Ok(Value::Num(-x));
        }
        if b == u8::from(Token::Plus) {
            self.bump();
            let x = self.unary_operand()?;
            return Ok(Value::Num(x));
        }
        if b == u8::from(Token::Not) {
            self.bump();
            let bits = float::to_logical(self.unary_operand()?)?;
            return Ok(Value::Num(!bits as i16 as f64));
        }
        if b == b'(' {
            self.bump();
            let value = self.eval_expr()?;
            self.expect_byte(b')')?;
            return Ok(value);
        }
        if b == b'"' {
            self.bump();
            let start = self.txtptr;
            while self.mem.read(self.txtptr) != b'"' && self.mem.read(self.txtptr) != 0 {
                self.txtptr += 1;
            }
            let len = (self.txtptr - start).min(255) as u8;
            if self.mem.read(self.txtptr) == b'"' {
                self.txtptr += 1;
            }
            let id = self.temps.push(Desc { len, ptr: start })?;
            return Ok(Value::Str(id));
        }
        if b.is_ascii_digit() || b == b'.' {
            let start = self.txtptr;
            let avail = (RAM_SIZE as u32 - start as u32).min(64) as usize;
            let (value, used) = float::fin(self.mem.slice(start, avail))?;
            self.txtptr = start + used as u16;
            return Ok(Value::Num(value));
        }
        if b.is_ascii_alphabetic() {
            return self.eval_variable();
        }
        if b == u8::from(Token::Fn) {
            self.bump();
            return self.eval_fn_call();
        }
        if let Ok(token) = Token::try_from(b) {
            if token.is_function() {
                self.bump();
                return self.eval_builtin(token);
            }
        }
        Err(Error::Syntax)
    }

    // ----- operator application -----

    fn apply_binary(&mut self, token: Token, lhs: Value, rhs: Value) -> Result<Value> {
        if token == Token::Plus {
            if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
                return self.concat(a, b);
            }
        }
        let (x, y) = match (lhs, rhs) {
            (Value::Num(x), Value::Num(y)) => (x, y),
            _ => return Err(Error::TypeMismatch),
        };
        let value = match token {
            Token::Plus => float::check(x + y)?,
            Token::Minus => float::check(x - y)?,
            Token::Multiply => float::check(x * y)?,
            Token::Divide => {
                if y == 0.0 {
                    return Err(Error::DivisionByZero);
                }
                float::check(x / y)?
            }
            Token::Power => {
                if x < 0.0 && y != y.floor() {
                    return Err(Error::IllegalQuantity);
                }
                if x == 0.0 && y < 0.0 {
                    return Err(Error::DivisionByZero);
                }
                float::check(x.powf(y))?
            }
            Token::And => {
                (float::to_logical(x)? & float::to_logical(y)?) as i16 as f64
            }
            Token::Or => {
                (float::to_logical(x)? | float::to_logical(y)?) as i16 as f64
            }
            _ => return Err(Error::Syntax),
        };
        Ok(Value::Num(value))
    }

    fn apply_relation(&mut self, mask: u8, lhs: Value, rhs: Value) -> Result<Value> {
        let ordering = match (lhs, rhs) {
            (Value::Num(x), Value::Num(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Value::Str(a), Value::Str(b)) => {
                let left = self.temps.get(a).bytes(&self.mem);
                let right = self.temps.get(b).bytes(&self.mem);
                self.free_string(b);
                self.free_string(a);
                left.cmp(&right)
            }
            _ => return Err(Error::TypeMismatch),
        };
        let bit = match ordering {
            Ordering::Greater => 1,
            Ordering::Equal => 2,
            Ordering::Less => 4,
        };
        Ok(Value::Num(if mask & bit != 0 { -1.0 } else { 0.0 }))
    }

    // ----- strings -----

    pub(crate) fn make_string(&mut self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() > 255 {
            return Err(Error::StringTooLong);
        }
        if bytes.is_empty() {
            let id = self.temps.push(Desc::EMPTY)?;
            return Ok(Value::Str(id));
        }
        let addr = strings::alloc(&mut self.mem, &mut self.temps, bytes.len() as u8)?;
        self.mem.write_slice(addr, bytes);
        let id = self.temps.push(Desc { len: bytes.len() as u8, ptr: addr })?;
        Ok(Value::Str(id))
    }

    fn concat(&mut self, a: usize, b: usize) -> Result<Value> {
        let total = self.temps.get(a).len as usize + self.temps.get(b).len as usize;
        if total > 255 {
            return Err(Error::StringTooLong);
        }
        if total == 0 {
            self.free_string(b);
            self.free_string(a);
            return self.make_string(b"");
        }
        let addr = strings::alloc(&mut self.mem, &mut self.temps, total as u8)?;
        // the collector may have rewritten either operand during alloc
        let da = self.temps.get(a);
        let db = self.temps.get(b);
        self.mem.copy(da.ptr, addr, da.len as usize);
        self.mem.copy(db.ptr, addr + da.len as u16, db.len as usize);
        self.free_string(b);
        self.free_string(a);
        let id = self.temps.push(Desc { len: total as u8, ptr: addr })?;
        Ok(Value::Str(id))
    }

    // Copy a slice of a string value into a fresh temporary.
    fn copy_slice(&mut self, id: usize, start: usize, len: usize) -> Result<Value> {
        if len == 0 {
            self.free_string(id);
            return self.make_string(b"");
        }
        let addr = strings::alloc(&mut self.mem, &mut self.temps, len as u8)?;
        let desc = self.temps.get(id);
        self.mem.copy(desc.ptr + start as u16, addr, len);
        self.free_string(id);
        let id = self.temps.push(Desc { len: len as u8, ptr: addr })?;
        Ok(Value::Str(id))
    }

    // ----- names, variables, subscripts -----

    pub(crate) fn parse_name(&mut self) -> Result<(Name, bool)> {
        let first = self.cur();
        if !first.is_ascii_alphabetic() {
            return Err(Error::Syntax);
        }
        self.bump();
        let mut second = 0u8;
        if self.cur().is_ascii_alphanumeric() {
            second = self.cur();
            self.bump();
            // only two characters are significant
            while self.cur().is_ascii_alphanumeric() {
                self.bump();
            }
        }
        let is_string = self.take_if(b'$');
        Ok((Name([first, second]), is_string))
    }

    fn parse_indices(&mut self) -> Result<Vec<u16>> {
        self.expect_byte(b'(')?;
        let mut indices = Vec::new();
        loop {
            let x = float::qint(self.eval_num()?)?;
            if x < 0 {
                return Err(Error::IllegalQuantity);
            }
            if x > 32766 {
                return Err(Error::BadSubscript);
            }
            indices.push(x as u16);
            if !self.take_if(b',') {
                break;
            }
        }
        self.expect_byte(b')')?;
        Ok(indices)
    }

    pub(crate) fn parse_lvalue(&mut self) -> Result<Lvalue> {
        let (name, is_string) = self.parse_name()?;
        if name == Name(*b"TI") {
            if is_string {
                return Ok(Lvalue::TiString);
            }
            return Err(Error::Syntax);
        }
        if self.cur() == b'(' {
            let indices = self.parse_indices()?;
            return Ok(Lvalue::Array { name, is_string, indices });
        }
        let entry = vars::lookup_or_create_simple(&mut self.mem, &mut self.temps, name, is_string)?;
        Ok(Lvalue::Simple { entry, is_string })
    }

    fn eval_variable(&mut self) -> Result<Value> {
        let (name, is_string) = self.parse_name()?;
        if name == Name(*b"TI") {
            if is_string {
                let seconds = self.ti_seconds();
                let text = format!(
                    "{:02}{:02}{:02}",
                    seconds / 3600,
                    seconds / 60 % 60,
                    seconds % 60
                );
                return self.make_string(text.as_bytes());
            }
            return Ok(Value::Num(self.ti_jiffies()));
        }
        if self.cur() == b'(' {
            let indices = self.parse_indices()?;
            let addr = self.array_element(name, is_string, &indices)?;
            if is_string {
                let desc = Desc::read(&self.mem, addr);
                let id = self.temps.push(desc)?;
                return Ok(Value::Str(id));
            }
            return Ok(Value::Num(vars::read_element(&self.mem, addr)));
        }
        let entry = vars::lookup_or_create_simple(&mut self.mem, &mut self.temps, name, is_string)?;
        if is_string {
            let desc = vars::read_desc(&self.mem, entry);
            let id = self.temps.push(desc)?;
            Ok(Value::Str(id))
        } else {
            Ok(Value::Num(vars::read_scalar(&self.mem, entry)))
        }
    }

    // ----- user functions -----

    fn eval_fn_call(&mut self) -> Result<Value> {
        let (name, is_string) = self.parse_name()?;
        if is_string {
            return Err(Error::Syntax);
        }
        let def = self.fns.get(&name).cloned().ok_or(Error::UndefdFunction)?;
        self.expect_byte(b'(')?;
        let arg = self.eval_num()?;
        self.expect_byte(b')')?;
        let entry = vars::lookup_or_create_simple(&mut self.mem, &mut self.temps, def.param, false)?;
        // the parameter binding is saved and restored around the call, so
        // shadowing survives recursive applications
        let saved: [u8; 4] = {
            let s = self.mem.slice(entry + 2, 4);
            [s[0], s[1], s[2], s[3]]
        };
        vars::write_scalar(&mut self.mem, entry, arg)?;
        let saved_ptr = self.txtptr;
        let saved_lin = self.curlin;
        self.txtptr = def.pos;
        self.curlin = Some(def.line);
        let result = self.eval_num();
        self.txtptr = saved_ptr;
        self.curlin = saved_lin;
        self.mem.write_slice(entry + 2, &saved);
        Ok(Value::Num(float::check(result?)?))
    }

    // ----- built-in functions -----

    fn paren_num(&mut self) -> Result<f64> {
        self.expect_byte(b'(')?;
        let x = self.eval_num()?;
        self.expect_byte(b')')?;
        Ok(x)
    }

    fn paren_str(&mut self) -> Result<usize> {
        self.expect_byte(b'(')?;
        let id = self.eval_str()?;
        self.expect_byte(b')')?;
        Ok(id)
    }

    fn eval_builtin(&mut self, token: Token) -> Result<Value> {
        match token {
            Token::Sgn => {
                let x = self.paren_num()?;
                Ok(Value::Num(if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }))
            }
            Token::Int => Ok(Value::Num(self.paren_num()?.floor())),
            Token::Abs => Ok(Value::Num(self.paren_num()?.abs())),
            Token::Sqr => {
                let x = self.paren_num()?;
                if x < 0.0 {
                    return Err(Error::IllegalQuantity);
                }
                Ok(Value::Num(x.sqrt()))
            }
            Token::Rnd => {
                let x = self.paren_num()?;
                let value = if x > 0.0 {
                    self.rnd.next()
                } else if x == 0.0 {
                    self.rnd.last()
                } else {
                    self.rnd.reseed(x)
                };
                Ok(Value::Num(value))
            }
            Token::Log => {
                let x = self.paren_num()?;
                if x <= 0.0 {
                    return Err(Error::IllegalQuantity);
                }
                Ok(Value::Num(x.ln()))
            }
            Token::Exp => Ok(Value::Num(float::check(self.paren_num()?.exp())?)),
            Token::Cos => Ok(Value::Num(self.paren_num()?.cos())),
            Token::Sin => Ok(Value::Num(self.paren_num()?.sin())),
            Token::Tan => Ok(Value::Num(float::check(self.paren_num()?.tan())?)),
            Token::Atn => Ok(Value::Num(self.paren_num()?.atan())),
            Token::Peek => {
                let x = self.paren_num()?;
                let addr = self.to_address(x)?;
                Ok(Value::Num(self.mem.read(addr) as f64))
            }
            Token::Usr => {
                let x = self.paren_num()?;
                let value = if let Some(mut hook) = self.usr_hook.take() {
                    let value = hook(x);
                    self.usr_hook = Some(hook);
                    value
                } else {
                    x
                };
                Ok(Value::Num(float::check(value)?))
            }
            Token::Fre => {
                self.expect_byte(b'(')?;
                if let Value::Str(id) = self.eval_expr()? {
                    self.free_string(id);
                }
                self.expect_byte(b')')?;
                strings::collect(&mut self.mem, &mut self.temps);
                Ok(Value::Num((self.mem.fretop() - self.mem.strend()) as f64))
            }
            Token::Pos => {
                self.expect_byte(b'(')?;
                if let Value::Str(id) = self.eval_expr()? {
                    self.free_string(id);
                }
                self.expect_byte(b')')?;
                Ok(Value::Num(self.console.column() as f64))
            }
            Token::Len => {
                let id = self.paren_str()?;
                let len = self.temps.get(id).len;
                self.free_string(id);
                Ok(Value::Num(len as f64))
            }
            Token::Val => {
                let id = self.paren_str()?;
                let bytes = self.temps.get(id).bytes(&self.mem);
                self.free_string(id);
                let (value, _) = float::fin(&bytes)?;
                Ok(Value::Num(value))
            }
            Token::Asc => {
                let id = self.paren_str()?;
                let desc = self.temps.get(id);
                if desc.len == 0 {
                    return Err(Error::IllegalQuantity);
                }
                let byte = self.mem.read(desc.ptr);
                self.free_string(id);
                Ok(Value::Num(byte as f64))
            }
            Token::ChrS => {
                let n = float::qint(self.paren_num()?)?;
                if n < 0 || n > 255 {
                    return Err(Error::IllegalQuantity);
                }
                self.make_string(&[n as u8])
            }
            Token::StrS => {
                let text = float::fout(self.paren_num()?);
                self.make_string(text.as_bytes())
            }
            Token::LeftS | Token::RightS => {
                self.expect_byte(b'(')?;
                let id = self.eval_str()?;
                self.expect_byte(b',')?;
                let n = float::qint(self.eval_num()?)?;
                if n < 0 || n > 255 {
                    return Err(Error::IllegalQuantity);
                }
                self.expect_byte(b')')?;
                let len = self.temps.get(id).len as usize;
                let take = (n as usize).min(len);
                let start = if token == Token::LeftS { 0 } else { len - take };
                self.copy_slice(id, start, take)
            }
            Token::MidS => {
                self.expect_byte(b'(')?;
                let id = self.eval_str()?;
                self.expect_byte(b',')?;
                let i = float::qint(self.eval_num()?)?;
                if i < 1 || i > 255 {
                    return Err(Error::IllegalQuantity);
                }
                let n = if self.take_if(b',') {
                    let n = float::qint(self.eval_num()?)?;
                    if n < 0 || n > 255 {
                        return Err(Error::IllegalQuantity);
                    }
                    n as usize
                } else {
                    255
                };
                self.expect_byte(b')')?;
                let len = self.temps.get(id).len as usize;
                let start = (i as usize - 1).min(len);
                let take = n.min(len - start);
                self.copy_slice(id, start, take)
            }
            _ => Err(Error::Syntax),
        }
    }
}
