// NEWSTT lives here: the statement loop, its text pointer, the shared
// FOR/GOSUB frame stack and the DATA cursor, plus one handler per
// statement. Handlers consume their own arguments from the text pointer
// and either fall through, retarget the pointer, or halt back to direct
// mode.

use crate::console::{Console, Storage};
use crate::crunch;
use crate::errors::{Error, Result};
use crate::eval::{Lvalue, Value};
use crate::float::{self, Mbf5, Rnd};
use crate::memory::Memory;
use crate::program;
use crate::strings::{self, Desc, Temps};
use crate::tokens::Token;
use crate::vars::{self, Name};
use crate::Configuration;
use log::debug;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::time::Instant;

// Combined FOR/GOSUB depth; past this the stack region would collide.
const MAX_FRAMES: usize = 64;

pub(crate) enum Flow {
    Continue,
    Halt,
}

#[derive(Clone)]
pub(crate) struct FnDef {
    pub param: Name,
    pub line: u16,
    pub pos: u16,
}

// One LIFO for both frame kinds; their interleaving is load-bearing for
// NEXT and RETURN unwinding.
pub(crate) enum Frame {
    For {
        name: Name,
        entry: u16,
        limit: Mbf5,
        step: Mbf5,
        line: Option<u16>,
        pos: u16,
    },
    Gosub {
        line: Option<u16>,
        pos: u16,
    },
}

#[derive(Copy, Clone)]
pub(crate) struct DataCursor {
    valid: bool,
    at_start: bool,
    addr: u16,
    line: u16,
}

pub(crate) enum Item {
    Num(f64),
    Str { ptr: u16, len: u8 },
}

pub struct Interpreter {
    pub(crate) mem: Memory,
    pub(crate) console: Box<dyn Console>,
    pub(crate) storage: Option<Box<dyn Storage>>,
    pub(crate) temps: Temps,
    pub(crate) frames: Vec<Frame>,
    pub(crate) txtptr: u16,
    pub(crate) curlin: Option<u16>,
    pub(crate) fns: HashMap<Name, FnDef>,
    pub(crate) rnd: Rnd,
    pub(crate) sys_hook: Option<Box<dyn FnMut(&mut Memory, u16)>>,
    pub(crate) usr_hook: Option<Box<dyn FnMut(f64) -> f64>>,
    data: DataCursor,
    cont: Option<(u16, u16)>,
    nulls: u8,
    started: Instant,
    ti_base: i64,
}

impl Interpreter {
    pub fn new(config: Configuration, console: Box<dyn Console>) -> Self {
        let mem = Memory::new(config.text_start, config.memory_top);
        Interpreter {
            mem,
            console,
            storage: None,
            temps: Temps::new(),
            frames: Vec::new(),
            txtptr: config.text_start,
            curlin: None,
            fns: HashMap::new(),
            rnd: Rnd::new(),
            sys_hook: None,
            usr_hook: None,
            data: DataCursor { valid: false, at_start: false, addr: 0, line: 0 },
            cont: None,
            nulls: 0,
            started: Instant::now(),
            ti_base: 0,
        }
    }

    pub fn attach_storage(&mut self, storage: Box<dyn Storage>) {
        self.storage = Some(storage);
    }
    pub fn install_sys(&mut self, hook: Box<dyn FnMut(&mut Memory, u16)>) {
        self.sys_hook = Some(hook);
    }
    pub fn install_usr(&mut self, hook: Box<dyn FnMut(f64) -> f64>) {
        self.usr_hook = Some(hook);
    }
    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    // ----- text pointer primitives (CHRGET and friends) -----

    pub(crate) fn cur(&mut self) -> u8 {
        loop {
            let b = self.mem.read(self.txtptr);
            if b == b' ' {
                self.txtptr += 1;
            } else {
                return b;
            }
        }
    }
    pub(crate) fn bump(&mut self) {
        self.txtptr += 1;
    }
    pub(crate) fn take_if(&mut self, byte: u8) -> bool {
        if self.cur() == byte {
            self.bump();
            true
        } else {
            false
        }
    }
    pub(crate) fn take_token(&mut self, token: Token) -> bool {
        self.take_if(u8::from(token))
    }
    pub(crate) fn expect_byte(&mut self, byte: u8) -> Result<()> {
        if self.take_if(byte) {
            Ok(())
        } else {
            Err(Error::Syntax)
        }
    }
    pub(crate) fn expect_token(&mut self, token: Token) -> Result<()> {
        if self.take_token(token) {
            Ok(())
        } else {
            Err(Error::Syntax)
        }
    }

    fn skip_line(&mut self) {
        while self.mem.read(self.txtptr) != 0 {
            self.txtptr += 1;
        }
    }

    // Move to the next ':' or end of line, leaving the pointer on it.
    // Quoted text never terminates a statement.
    fn skip_statement(&mut self) {
        loop {
            match self.mem.read(self.txtptr) {
                0 | b':' => return,
                b'"' => {
                    self.txtptr += 1;
                    while self.mem.read(self.txtptr) != b'"' && self.mem.read(self.txtptr) != 0 {
                        self.txtptr += 1;
                    }
                    if self.mem.read(self.txtptr) == b'"' {
                        self.txtptr += 1;
                    }
                }
                _ => self.txtptr += 1,
            }
        }
    }

    // ----- state management -----

    // CLEAR: forget variables, arrays, strings, frames and functions, but
    // keep the program.
    pub(crate) fn clear_state(&mut self) {
        let vartab = self.mem.vartab();
        self.mem.set_arytab(vartab);
        self.mem.set_strend(vartab);
        let memsiz = self.mem.memsiz();
        self.mem.set_fretop(memsiz);
        self.frames.clear();
        self.temps.clear();
        self.fns.clear();
        self.cont = None;
        self.reset_data();
    }

    fn reset_data(&mut self) {
        self.data = match program::first_line(&self.mem) {
            Some(first) => DataCursor {
                valid: true,
                at_start: true,
                addr: first + 4,
                line: program::line_number(&self.mem, first),
            },
            None => DataCursor { valid: false, at_start: false, addr: 0, line: 0 },
        };
    }

    pub(crate) fn report_error(&mut self, error: &Error) {
        if self.console.column() > 0 {
            self.console.write(b"\n");
        }
        let mut text = format!("{}", error);
        if let Some(line) = self.curlin {
            text.push_str(&format!(" IN {}", line));
        }
        text.push('\n');
        self.console.write(text.as_bytes());
        self.frames.clear();
        self.temps.clear();
        self.curlin = None;
        self.cont = None;
    }

    // ----- the main loop -----

    pub(crate) fn main_loop(&mut self) -> Result<()> {
        loop {
            if self.console.break_requested() {
                self.break_stop();
                return Ok(());
            }
            self.temps.clear();
            let b = self.cur();
            if b == 0 {
                if self.curlin.is_none() {
                    return Ok(());
                }
                let header = self.txtptr + 1;
                if self.mem.read_word(header) == 0 {
                    return Ok(());
                }
                self.curlin = Some(self.mem.read_word(header + 2));
                self.txtptr = header + 4;
                continue;
            }
            if b == b':' {
                self.bump();
                continue;
            }
            match self.statement()? {
                Flow::Continue => {}
                Flow::Halt => return Ok(()),
            }
        }
    }

    fn statement(&mut self) -> Result<Flow> {
        let b = self.cur();
        if b < 0x80 {
            self.stmt_let()?;
            return Ok(Flow::Continue);
        }
        let token = Token::try_from(b).map_err(|_| Error::Syntax)?;
        if !token.is_statement() {
            return Err(Error::Syntax);
        }
        self.bump();
        match token {
            Token::End => self.stmt_end(false),
            Token::Stop => self.stmt_end(true),
            Token::New => {
                program::erase(&mut self.mem);
                self.clear_state();
                Ok(Flow::Halt)
            }
            Token::Run => self.stmt_run(),
            Token::Cont => self.stmt_cont(),
            Token::Load => self.stmt_load(),
            Token::Input => self.stmt_input(),
            Token::Wait => self.stmt_wait(),
            Token::For => self.stmt_for().map(|_| Flow::Continue),
            Token::Next => self.stmt_next().map(|_| Flow::Continue),
            Token::Data => {
                self.skip_statement();
                Ok(Flow::Continue)
            }
            Token::Rem => {
                self.skip_line();
                Ok(Flow::Continue)
            }
            Token::Dim => self.stmt_dim().map(|_| Flow::Continue),
            Token::Read => self.stmt_read().map(|_| Flow::Continue),
            Token::Let => self.stmt_let().map(|_| Flow::Continue),
            Token::Goto => self.stmt_goto().map(|_| Flow::Continue),
            Token::If => self.stmt_if().map(|_| Flow::Continue),
            Token::Restore => self.stmt_restore().map(|_| Flow::Continue),
            Token::Gosub => self.stmt_gosub().map(|_| Flow::Continue),
            Token::Return => self.stmt_return().map(|_| Flow::Continue),
            Token::On => self.stmt_on().map(|_| Flow::Continue),
            Token::Null => self.stmt_null().map(|_| Flow::Continue),
            Token::Save => self.stmt_save().map(|_| Flow::Continue),
            Token::Def => self.stmt_def().map(|_| Flow::Continue),
            Token::Poke => self.stmt_poke().map(|_| Flow::Continue),
            Token::Print => self.stmt_print().map(|_| Flow::Continue),
            Token::List => self.stmt_list().map(|_| Flow::Continue),
            Token::Clear => {
                self.clear_state();
                Ok(Flow::Continue)
            }
            Token::Get => self.stmt_get().map(|_| Flow::Continue),
            Token::Sys => self.stmt_sys().map(|_| Flow::Continue),
            _ => Err(Error::Syntax),
        }
    }

    fn break_stop(&mut self) {
        if let Some(line) = self.curlin {
            self.cont = Some((self.txtptr, line));
            self.console.write(format!("\nBREAK IN {}\n", line).as_bytes());
        } else {
            self.console.write(b"\nBREAK\n");
        }
    }

    // ----- flow statements -----

    fn stmt_end(&mut self, stop: bool) -> Result<Flow> {
        let b = self.cur();
        if b != 0 && b != b':' {
            return Err(Error::Syntax);
        }
        if let Some(line) = self.curlin {
            self.cont = Some((self.txtptr, line));
            if stop {
                self.console.write(format!("\nBREAK IN {}\n", line).as_bytes());
            }
        } else if stop {
            self.console.write(b"\nBREAK\n");
        }
        Ok(Flow::Halt)
    }

    fn do_goto(&mut self, number: u16) -> Result<()> {
        let line = program::find_line(&self.mem, number).ok_or(Error::UndefdStatement)?;
        self.curlin = Some(number);
        self.txtptr = line + 4;
        Ok(())
    }

    // A branch target is a full expression, truncated toward zero.
    fn line_target(&mut self) -> Result<u16> {
        let n = self.eval_num()?.trunc();
        if n < 0.0 || n >= 64000.0 {
            return Err(Error::IllegalQuantity);
        }
        Ok(n as u16)
    }

    // Plain unsigned digits, for THEN, LIST and ON lists.
    fn linget(&mut self) -> Result<u16> {
        if !self.cur().is_ascii_digit() {
            return Err(Error::Syntax);
        }
        let mut n: u32 = 0;
        while self.cur().is_ascii_digit() {
            n = n * 10 + (self.cur() - b'0') as u32;
            if n > program::MAX_LINE as u32 {
                return Err(Error::Syntax);
            }
            self.bump();
        }
        Ok(n as u16)
    }

    fn stmt_goto(&mut self) -> Result<()> {
        let n = self.line_target()?;
        self.do_goto(n)
    }

    fn push_gosub(&mut self) -> Result<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(Error::OutOfMemory);
        }
        self.frames.push(Frame::Gosub { line: self.curlin, pos: self.txtptr });
        Ok(())
    }

    fn stmt_gosub(&mut self) -> Result<()> {
        let n = self.line_target()?;
        self.push_gosub()?;
        self.do_goto(n)
    }

    fn stmt_return(&mut self) -> Result<()> {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Gosub { line, pos } = frame {
                self.curlin = line;
                self.txtptr = pos;
                self.skip_statement();
                return Ok(());
            }
        }
        Err(Error::ReturnWithoutGosub)
    }

    fn stmt_if(&mut self) -> Result<()> {
        let cond = self.eval_num()?;
        if self.cur() == u8::from(Token::Goto) {
            if cond == 0.0 {
                self.skip_line();
            }
            return Ok(());
        }
        self.expect_token(Token::Then)?;
        if cond == 0.0 {
            self.skip_line();
            return Ok(());
        }
        if self.cur().is_ascii_digit() {
            let n = self.linget()?;
            return self.do_goto(n);
        }
        Ok(())
    }

    fn stmt_on(&mut self) -> Result<()> {
        let k = float::qint(self.eval_num()?)?;
        if k < 0 || k > 255 {
            return Err(Error::IllegalQuantity);
        }
        let gosub = if self.take_token(Token::Gosub) {
            true
        } else {
            self.expect_token(Token::Goto)?;
            false
        };
        let mut index = 1;
        loop {
            let n = self.linget()?;
            if index == k {
                if gosub {
                    self.push_gosub()?;
                }
                return self.do_goto(n);
            }
            if self.take_if(b',') {
                index += 1;
                continue;
            }
            return Ok(());
        }
    }

    fn stmt_for(&mut self) -> Result<()> {
        let (name, is_string) = self.parse_name()?;
        if is_string {
            return Err(Error::TypeMismatch);
        }
        let entry = vars::lookup_or_create_simple(&mut self.mem, &mut self.temps, name, false)?;
        self.expect_token(Token::Equal)?;
        let start = self.eval_num()?;
        vars::write_scalar(&mut self.mem, entry, start)?;
        self.expect_token(Token::To)?;
        let limit = float::pack(self.eval_num()?)?;
        let step = if self.take_token(Token::Step) {
            float::pack(self.eval_num()?)?
        } else {
            float::pack(1.0)?
        };
        // A live frame for the same variable, and everything above it, is
        // discarded before the new one goes on.
        let mut i = self.frames.len();
        while i > 0 {
            match &self.frames[i - 1] {
                Frame::Gosub { .. } => break,
                Frame::For { name: other, .. } => {
                    if *other == name {
                        self.frames.truncate(i - 1);
                        break;
                    }
                    i -= 1;
                }
            }
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(Error::OutOfMemory);
        }
        self.frames.push(Frame::For {
            name,
            entry,
            limit,
            step,
            line: self.curlin,
            pos: self.txtptr,
        });
        Ok(())
    }

    fn stmt_next(&mut self) -> Result<()> {
        loop {
            let name = if self.cur().is_ascii_alphabetic() {
                let (n, is_string) = self.parse_name()?;
                if is_string {
                    return Err(Error::Syntax);
                }
                Some(n)
            } else {
                None
            };
            let mut i = self.frames.len();
            let mut found = None;
            while i > 0 {
                match &self.frames[i - 1] {
                    Frame::Gosub { .. } => break,
                    Frame::For { name: other, .. } => {
                        if name.map_or(true, |n| n == *other) {
                            found = Some(i - 1);
                            break;
                        }
                        i -= 1;
                    }
                }
            }
            let at = found.ok_or(Error::NextWithoutFor)?;
            // inner loops of other variables are abandoned
            self.frames.truncate(at + 1);
            let (entry, limit, step, line, pos) = match &self.frames[at] {
                Frame::For { entry, limit, step, line, pos, .. } => {
                    (*entry, *limit, *step, *line, *pos)
                }
                Frame::Gosub { .. } => unreachable!(),
            };
            let step_v = float::unpack(step);
            let value = float::check(vars::read_scalar(&self.mem, entry) + step_v)?;
            vars::write_scalar(&mut self.mem, entry, value)?;
            let sign = if step_v > 0.0 {
                1.0
            } else if step_v < 0.0 {
                -1.0
            } else {
                0.0
            };
            if (value - float::unpack(limit)) * sign > 0.0 {
                self.frames.truncate(at);
                if self.take_if(b',') {
                    continue;
                }
                return Ok(());
            }
            self.curlin = line;
            self.txtptr = pos;
            return Ok(());
        }
    }

    // ----- assignment -----

    fn stmt_let(&mut self) -> Result<()> {
        let lvalue = self.parse_lvalue()?;
        self.expect_token(Token::Equal)?;
        self.assign(lvalue)
    }

    fn assign(&mut self, lvalue: Lvalue) -> Result<()> {
        if lvalue.is_string() {
            let id = self.eval_str()?;
            self.store_string_lvalue(lvalue, id)
        } else {
            let x = self.eval_num()?;
            self.store_number_lvalue(lvalue, x)
        }
    }

    fn store_number_lvalue(&mut self, lvalue: Lvalue, x: f64) -> Result<()> {
        match lvalue {
            Lvalue::Simple { entry, .. } => vars::write_scalar(&mut self.mem, entry, x),
            Lvalue::Array { name, indices, .. } => {
                // resolve after the right-hand side; evaluation may have
                // grown the tables and moved the array
                let addr = self.array_element(name, false, &indices)?;
                vars::write_element(&mut self.mem, addr, x)
            }
            Lvalue::TiString => Err(Error::TypeMismatch),
        }
    }

    fn store_string_lvalue(&mut self, lvalue: Lvalue, id: usize) -> Result<()> {
        match lvalue {
            Lvalue::Simple { entry, .. } => {
                let desc = self.keep_string(id)?;
                vars::write_desc(&mut self.mem, entry, desc);
                Ok(())
            }
            Lvalue::Array { name, indices, .. } => {
                let desc = self.keep_string(id)?;
                let addr = self.array_element(name, true, &indices)?;
                desc.write(&mut self.mem, addr);
                Ok(())
            }
            Lvalue::TiString => {
                let bytes = self.temps.get(id).bytes(&self.mem);
                self.free_string(id);
                self.set_ti_string(&bytes)
            }
        }
    }

    // Turn an expression temporary into a descriptor a variable may own.
    // Literals inside the program are referenced in place; heap bytes are
    // adopted or shared; anything in the input buffer is copied out.
    pub(crate) fn keep_string(&mut self, id: usize) -> Result<Desc> {
        let desc = self.temps.get(id);
        if desc.len == 0 {
            self.temps.discard(id);
            return Ok(Desc::EMPTY);
        }
        let in_program = desc.ptr >= self.mem.txttab() && desc.ptr < self.mem.vartab();
        let in_heap = desc.ptr >= self.mem.strend();
        if in_program || in_heap {
            self.temps.discard(id);
            return Ok(desc);
        }
        let addr = strings::alloc(&mut self.mem, &mut self.temps, desc.len)?;
        let desc = self.temps.get(id);
        let bytes = desc.bytes(&self.mem);
        self.mem.write_slice(addr, &bytes);
        self.temps.discard(id);
        Ok(Desc { len: desc.len, ptr: addr })
    }

    pub(crate) fn free_string(&mut self, id: usize) {
        self.temps.free(id, &mut self.mem);
    }

    pub(crate) fn array_element(
        &mut self,
        name: Name,
        is_string: bool,
        indices: &[u16],
    ) -> Result<u16> {
        let arr = match vars::find_array(&self.mem, name, is_string) {
            Some(a) => a,
            None => vars::create_array(
                &mut self.mem,
                &mut self.temps,
                name,
                is_string,
                &vec![11; indices.len()],
            )?,
        };
        vars::element_addr(&self.mem, arr, indices)
    }

    // ----- console statements -----

    fn newline(&mut self) {
        self.console.write(b"\n");
        for _ in 0..self.nulls {
            self.console.write(&[0]);
        }
    }

    fn stmt_print(&mut self) -> Result<()> {
        let mut newline = true;
        loop {
            let b = self.cur();
            if b == 0 || b == b':' {
                break;
            }
            if b == b',' {
                self.bump();
                let col = self.console.column();
                if col >= 30 {
                    self.newline();
                } else {
                    let pad = 10 - col % 10;
                    self.console.write(&b"          "[..pad]);
                }
                newline = false;
                continue;
            }
            if b == b';' {
                self.bump();
                newline = false;
                continue;
            }
            if b == u8::from(Token::Tab) || b == u8::from(Token::Spc) {
                let spaces = b == u8::from(Token::Spc);
                self.bump();
                let n = float::qint(self.eval_num()?)?;
                if n < 0 || n > 255 {
                    return Err(Error::IllegalQuantity);
                }
                self.expect_byte(b')')?;
                if spaces {
                    for _ in 0..n {
                        self.console.write(b" ");
                    }
                } else {
                    while self.console.column() < n as usize {
                        self.console.write(b" ");
                    }
                }
                newline = true;
                continue;
            }
            match self.eval_expr()? {
                Value::Num(x) => {
                    let mut text = float::fout(x);
                    text.push(' ');
                    self.console.write(text.as_bytes());
                }
                Value::Str(id) => {
                    let bytes = self.temps.get(id).bytes(&self.mem);
                    self.free_string(id);
                    self.console.write(&bytes);
                }
            }
            newline = true;
        }
        if newline {
            self.newline();
        }
        Ok(())
    }

    fn load_buffer(&mut self, line: &str) -> u16 {
        let buf = crate::memory::BUF;
        let bytes = line.as_bytes();
        let len = bytes.len().min(255);
        self.mem.write_slice(buf, &bytes[..len]);
        self.mem.write(buf + len as u16, 0);
        buf
    }

    fn buffer_exhausted(&self, mut cursor: u16) -> bool {
        loop {
            match self.mem.read(cursor) {
                b' ' => cursor += 1,
                0 => return true,
                _ => return false,
            }
        }
    }

    fn stmt_input(&mut self) -> Result<Flow> {
        if self.curlin.is_none() {
            return Err(Error::IllegalDirect);
        }
        let mut prompt = String::new();
        if self.cur() == b'"' {
            self.bump();
            let start = self.txtptr;
            while self.mem.read(self.txtptr) != b'"' && self.mem.read(self.txtptr) != 0 {
                self.txtptr += 1;
            }
            let bytes = self.mem.slice(start, (self.txtptr - start) as usize).to_vec();
            prompt = String::from_utf8_lossy(&bytes).into_owned();
            if self.mem.read(self.txtptr) == b'"' {
                self.txtptr += 1;
            }
            self.expect_byte(b';')?;
        }
        let list_start = self.txtptr;
        'attempt: loop {
            self.txtptr = list_start;
            let line = match self.console.read_line(&format!("{}? ", prompt)) {
                Some(line) => line,
                None => return Ok(Flow::Halt),
            };
            // a bare RETURN abandons the program, as on the PET
            if line.is_empty() {
                return Ok(Flow::Halt);
            }
            let mut cursor = self.load_buffer(&line);
            loop {
                let lvalue = self.parse_lvalue()?;
                if self.buffer_exhausted(cursor) {
                    let more = match self.console.read_line("?? ") {
                        Some(line) => line,
                        None => return Ok(Flow::Halt),
                    };
                    cursor = self.load_buffer(&more);
                }
                let item = match self.read_item(&mut cursor, lvalue.is_string()) {
                    Ok(item) => item,
                    Err(Error::Syntax) => {
                        self.console.write(b"?REDO FROM START\n");
                        continue 'attempt;
                    }
                    Err(error) => return Err(error),
                };
                self.assign_item(lvalue, item)?;
                while self.mem.read(cursor) == b' ' {
                    cursor += 1;
                }
                if self.mem.read(cursor) == b',' {
                    cursor += 1;
                }
                if !self.take_if(b',') {
                    break;
                }
            }
            if !self.buffer_exhausted(cursor) {
                self.console.write(b"?EXTRA IGNORED\n");
            }
            return Ok(Flow::Continue);
        }
    }

    fn stmt_get(&mut self) -> Result<()> {
        if self.curlin.is_none() {
            return Err(Error::IllegalDirect);
        }
        let lvalue = self.parse_lvalue()?;
        let key = self.console.poll_char();
        if lvalue.is_string() {
            let id = match key {
                Some(byte) => match self.make_string(&[byte])? {
                    Value::Str(id) => id,
                    Value::Num(_) => unreachable!(),
                },
                None => self.temps.push(Desc::EMPTY)?,
            };
            self.store_string_lvalue(lvalue, id)
        } else {
            let x = match key {
                None => 0.0,
                Some(byte) if byte.is_ascii_digit() => (byte - b'0') as f64,
                Some(_) => return Err(Error::Syntax),
            };
            self.store_number_lvalue(lvalue, x)
        }
    }

    // ----- DATA / READ -----

    // Parse one datum or input item at the cursor. Quoted strings keep
    // everything; unquoted ones end at a separator. Numbers must be
    // followed by a separator once FIN has eaten what it can.
    fn read_item(&mut self, cursor: &mut u16, is_string: bool) -> Result<Item> {
        while self.mem.read(*cursor) == b' ' {
            *cursor += 1;
        }
        if is_string {
            if self.mem.read(*cursor) == b'"' {
                *cursor += 1;
                let start = *cursor;
                while self.mem.read(*cursor) != b'"' && self.mem.read(*cursor) != 0 {
                    *cursor += 1;
                }
                let len = (*cursor - start).min(255) as u8;
                if self.mem.read(*cursor) == b'"' {
                    *cursor += 1;
                }
                return Ok(Item::Str { ptr: start, len });
            }
            let start = *cursor;
            loop {
                match self.mem.read(*cursor) {
                    0 | b':' | b',' => break,
                    _ => *cursor += 1,
                }
            }
            let mut end = *cursor;
            while end > start && self.mem.read(end - 1) == b' ' {
                end -= 1;
            }
            return Ok(Item::Str { ptr: start, len: (end - start).min(255) as u8 });
        }
        let mut probe = *cursor;
        loop {
            match self.mem.read(probe) {
                0 | b':' | b',' => break,
                _ => probe += 1,
            }
        }
        let bytes = self.mem.slice(*cursor, (probe - *cursor) as usize).to_vec();
        let (value, used) = float::fin(&bytes)?;
        if bytes[used..].iter().any(|&b| b != b' ') {
            return Err(Error::Syntax);
        }
        *cursor = probe;
        Ok(Item::Num(value))
    }

    fn assign_item(&mut self, lvalue: Lvalue, item: Item) -> Result<()> {
        match item {
            Item::Num(x) => self.store_number_lvalue(lvalue, x),
            Item::Str { ptr, len } => {
                let id = self.temps.push(Desc { len, ptr })?;
                self.store_string_lvalue(lvalue, id)
            }
        }
    }

    fn stmt_read(&mut self) -> Result<()> {
        loop {
            let lvalue = self.parse_lvalue()?;
            let item = self.next_datum(lvalue.is_string())?;
            self.assign_item(lvalue, item)?;
            if !self.take_if(b',') {
                return Ok(());
            }
        }
    }

    fn next_datum(&mut self, is_string: bool) -> Result<Item> {
        if !self.data.valid {
            return Err(Error::OutOfData);
        }
        loop {
            if self.data.at_start {
                let mut addr = self.data.addr;
                while self.mem.read(addr) == b' ' {
                    addr += 1;
                }
                if self.mem.read(addr) == u8::from(Token::Data) {
                    let mut cursor = addr + 1;
                    let result = self.read_item(&mut cursor, is_string);
                    self.data.addr = cursor;
                    self.data.at_start = false;
                    return self.finish_datum(result);
                }
                self.data.addr = addr;
                self.data.at_start = false;
                continue;
            }
            let mut addr = self.data.addr;
            while self.mem.read(addr) == b' ' {
                addr += 1;
            }
            if self.mem.read(addr) == b',' {
                let mut cursor = addr + 1;
                let result = self.read_item(&mut cursor, is_string);
                self.data.addr = cursor;
                return self.finish_datum(result);
            }
            // skip the rest of this statement, honouring quotes
            loop {
                match self.mem.read(addr) {
                    0 | b':' => break,
                    b'"' => {
                        addr += 1;
                        while self.mem.read(addr) != b'"' && self.mem.read(addr) != 0 {
                            addr += 1;
                        }
                        if self.mem.read(addr) == b'"' {
                            addr += 1;
                        }
                    }
                    _ => addr += 1,
                }
            }
            if self.mem.read(addr) == b':' {
                self.data.addr = addr + 1;
                self.data.at_start = true;
                continue;
            }
            let header = addr + 1;
            if self.mem.read_word(header) == 0 {
                self.data.valid = false;
                return Err(Error::OutOfData);
            }
            self.data.line = self.mem.read_word(header + 2);
            self.data.addr = header + 4;
            self.data.at_start = true;
        }
    }

    // Bad data is reported at the DATA line itself, the way the original
    // swaps DATLIN into CURLIN before bailing out.
    fn finish_datum(&mut self, result: Result<Item>) -> Result<Item> {
        if let Err(Error::Syntax) = &result {
            self.curlin = Some(self.data.line);
        }
        result
    }

    // ----- remaining statements -----

    fn stmt_restore(&mut self) -> Result<()> {
        if self.cur().is_ascii_digit() {
            let n = self.linget()?;
            self.data = match program::find_line_at_or_after(&self.mem, n) {
                Some(line) => DataCursor {
                    valid: true,
                    at_start: true,
                    addr: line + 4,
                    line: program::line_number(&self.mem, line),
                },
                None => DataCursor { valid: false, at_start: false, addr: 0, line: 0 },
            };
        } else {
            self.reset_data();
        }
        Ok(())
    }

    fn stmt_dim(&mut self) -> Result<()> {
        loop {
            let (name, is_string) = self.parse_name()?;
            self.expect_byte(b'(')?;
            let mut extents = Vec::new();
            loop {
                let x = float::qint(self.eval_num()?)?;
                if x < 0 || x > 32766 {
                    return Err(Error::IllegalQuantity);
                }
                extents.push(x as u16 + 1);
                if !self.take_if(b',') {
                    break;
                }
            }
            self.expect_byte(b')')?;
            if vars::find_array(&self.mem, name, is_string).is_some() {
                return Err(Error::RedimdArray);
            }
            vars::create_array(&mut self.mem, &mut self.temps, name, is_string, &extents)?;
            if !self.take_if(b',') {
                return Ok(());
            }
        }
    }

    fn stmt_def(&mut self) -> Result<()> {
        let line = self.curlin.ok_or(Error::IllegalDirect)?;
        self.expect_token(Token::Fn)?;
        let (name, is_string) = self.parse_name()?;
        if is_string {
            return Err(Error::Syntax);
        }
        self.expect_byte(b'(')?;
        let (param, param_string) = self.parse_name()?;
        if param_string {
            return Err(Error::Syntax);
        }
        self.expect_byte(b')')?;
        self.expect_token(Token::Equal)?;
        self.fns.insert(name, FnDef { param, line, pos: self.txtptr });
        self.skip_statement();
        Ok(())
    }

    fn stmt_run(&mut self) -> Result<Flow> {
        let target = if self.cur().is_ascii_digit() {
            Some(self.linget()?)
        } else {
            None
        };
        self.clear_state();
        match target {
            Some(n) => {
                self.do_goto(n)?;
                Ok(Flow::Continue)
            }
            None => match program::first_line(&self.mem) {
                Some(first) => {
                    self.curlin = Some(program::line_number(&self.mem, first));
                    self.txtptr = first + 4;
                    Ok(Flow::Continue)
                }
                None => Ok(Flow::Halt),
            },
        }
    }

    fn stmt_cont(&mut self) -> Result<Flow> {
        match self.cont.take() {
            Some((pos, line)) => {
                self.txtptr = pos;
                self.curlin = Some(line);
                Ok(Flow::Continue)
            }
            None => Err(Error::CantContinue),
        }
    }

    fn stmt_list(&mut self) -> Result<()> {
        let mut from = None;
        let mut to = None;
        if self.cur().is_ascii_digit() {
            from = Some(self.linget()?);
        }
        if self.take_token(Token::Minus) {
            to = if self.cur().is_ascii_digit() {
                Some(self.linget()?)
            } else {
                Some(program::MAX_LINE)
            };
        }
        let (first, last) = match (from, to) {
            (None, None) => (0, program::MAX_LINE),
            (Some(f), None) => (f, f),
            (f, Some(t)) => (f.unwrap_or(0), t),
        };
        let mut pos = program::first_line(&self.mem);
        while let Some(line) = pos {
            let number = program::line_number(&self.mem, line);
            if number > last {
                break;
            }
            if number >= first {
                let text = crunch::detokenize(&program::line_tokens(&self.mem, line));
                self.console.write(format!("{} {}\n", number, text).as_bytes());
            }
            if self.console.break_requested() {
                break;
            }
            pos = program::next_line(&self.mem, line);
        }
        Ok(())
    }

    fn file_name(&mut self) -> Result<String> {
        let b = self.cur();
        if b == 0 || b == b':' {
            return Ok(String::new());
        }
        let id = self.eval_str()?;
        let bytes = self.temps.get(id).bytes(&self.mem);
        self.free_string(id);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn stmt_load(&mut self) -> Result<Flow> {
        let name = self.file_name()?;
        let mut storage = self.storage.take().ok_or(Error::FileNotFound)?;
        let result = storage.load(&name);
        self.storage = Some(storage);
        let bytes = result?;
        program::deserialize(&mut self.mem, &bytes)?;
        self.clear_state();
        debug!("loaded \"{}\" ({} bytes)", name, bytes.len());
        Ok(Flow::Halt)
    }

    fn stmt_save(&mut self) -> Result<()> {
        let name = self.file_name()?;
        let bytes = program::serialize(&self.mem);
        let mut storage = self.storage.take().ok_or(Error::FileNotFound)?;
        let result = storage.save(&name, &bytes);
        self.storage = Some(storage);
        result?;
        debug!("saved \"{}\" ({} bytes)", name, bytes.len());
        Ok(())
    }

    pub(crate) fn to_address(&mut self, x: f64) -> Result<u16> {
        let n = float::qint(x)?;
        if n < 0 || n > 65535 {
            return Err(Error::IllegalQuantity);
        }
        Ok(n as u16)
    }

    fn byte_operand(&mut self) -> Result<u8> {
        let n = float::qint(self.eval_num()?)?;
        if n < 0 || n > 255 {
            return Err(Error::IllegalQuantity);
        }
        Ok(n as u8)
    }

    fn stmt_poke(&mut self) -> Result<()> {
        let x = self.eval_num()?;
        let addr = self.to_address(x)?;
        self.expect_byte(b',')?;
        let value = self.byte_operand()?;
        self.mem.write(addr, value);
        Ok(())
    }

    fn stmt_wait(&mut self) -> Result<Flow> {
        let x = self.eval_num()?;
        let addr = self.to_address(x)?;
        self.expect_byte(b',')?;
        let mask = self.byte_operand()?;
        let xor = if self.take_if(b',') { self.byte_operand()? } else { 0 };
        loop {
            if (self.mem.read(addr) ^ xor) & mask != 0 {
                return Ok(Flow::Continue);
            }
            if self.console.break_requested() {
                self.break_stop();
                return Ok(Flow::Halt);
            }
        }
    }

    fn stmt_null(&mut self) -> Result<()> {
        self.nulls = self.byte_operand()?;
        Ok(())
    }

    fn stmt_sys(&mut self) -> Result<()> {
        let x = self.eval_num()?;
        let addr = self.to_address(x)?;
        if let Some(mut hook) = self.sys_hook.take() {
            hook(&mut self.mem, addr);
            self.sys_hook = Some(hook);
        }
        Ok(())
    }

    // ----- the jiffy clock -----

    fn set_ti_string(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != 6 || !bytes.iter().all(|b| b.is_ascii_digit()) {
            return Err(Error::IllegalQuantity);
        }
        let digit = |i: usize| (bytes[i] - b'0') as i64;
        let seconds = (digit(0) * 10 + digit(1)) * 3600
            + (digit(2) * 10 + digit(3)) * 60
            + digit(4) * 10
            + digit(5);
        self.ti_base = seconds - self.started.elapsed().as_secs() as i64;
        Ok(())
    }

    pub(crate) fn ti_seconds(&self) -> u64 {
        (self.ti_base + self.started.elapsed().as_secs() as i64).rem_euclid(86400) as u64
    }

    pub(crate) fn ti_jiffies(&self) -> f64 {
        let seconds =
            (self.ti_base as f64 + self.started.elapsed().as_secs_f64()).rem_euclid(86400.0);
        (seconds * 60.0).floor()
    }
}
