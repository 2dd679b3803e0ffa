use mb6502::console::{Console, Storage};
use mb6502::{Configuration, Interpreter};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

// A scripted console: queued input lines and keys in, everything written
// captured in a shared buffer.
struct ScriptConsole {
    out: Rc<RefCell<Vec<u8>>>,
    input: VecDeque<String>,
    keys: VecDeque<u8>,
    column: usize,
}

impl Console for ScriptConsole {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' => self.column = 0,
                0 => {}
                _ => self.column += 1,
            }
        }
        self.out.borrow_mut().extend_from_slice(bytes);
    }
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.write(prompt.as_bytes());
        let line = self.input.pop_front()?;
        self.column = 0;
        Some(line)
    }
    fn poll_char(&mut self) -> Option<u8> {
        self.keys.pop_front()
    }
    fn column(&self) -> usize {
        self.column
    }
}

struct MemStore(Rc<RefCell<HashMap<String, Vec<u8>>>>);

impl Storage for MemStore {
    fn load(&mut self, name: &str) -> io::Result<Vec<u8>> {
        self.0
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
    fn save(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.0.borrow_mut().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

fn machine(
    config: Configuration,
    input: &[&str],
    keys: &[u8],
) -> (Interpreter, Rc<RefCell<Vec<u8>>>) {
    let out = Rc::new(RefCell::new(Vec::new()));
    let console = ScriptConsole {
        out: Rc::clone(&out),
        input: input.iter().map(|s| s.to_string()).collect(),
        keys: keys.iter().copied().collect(),
        column: 0,
    };
    (Interpreter::new(config, Box::new(console)), out)
}

fn session_full(config: Configuration, commands: &[&str], input: &[&str], keys: &[u8]) -> String {
    let (mut basic, out) = machine(config, input, keys);
    for command in commands {
        basic.execute_line(command);
    }
    let bytes = out.borrow().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn session(commands: &[&str]) -> String {
    session_full(Configuration::default(), commands, &[], &[])
}

#[test]
fn for_next_counting() {
    let out = session(&["10 FOR I=1 TO 3 : PRINT I; : NEXT : PRINT \"X\"", "RUN"]);
    assert_eq!(out, " 1  2  3 X\n");
}

#[test]
fn recursive_gosub_preserves_variables() {
    let out = session(&[
        "10 A=5 : GOSUB 100 : PRINT A : END",
        "100 A=A+1 : IF A<8 THEN GOSUB 100",
        "110 RETURN",
        "RUN",
    ]);
    assert_eq!(out, " 8 \n");
}

#[test]
fn string_gc_under_pressure() {
    // A tight memory top forces several collections over the loop.
    let config = Configuration { text_start: 0x0401, memory_top: 0x1800 };
    let out = session_full(
        config,
        &["10 FOR I=1 TO 200 : A$=A$+\"X\" : NEXT", "20 PRINT LEN(A$)", "RUN"],
        &[],
        &[],
    );
    assert_eq!(out, " 200 \n");
}

#[test]
fn data_read_restore() {
    let out = session(&[
        "10 DATA 1,2,3",
        "20 READ A : READ B : RESTORE : READ C",
        "30 PRINT A;B;C",
        "RUN",
    ]);
    assert_eq!(out, " 1  2  1 \n");
}

#[test]
fn on_goto_out_of_range_falls_through() {
    let out = session(&[
        "10 ON 0 GOTO 50,60 : PRINT \"F\" : END",
        "50 PRINT \"A\" : END",
        "60 PRINT \"B\" : END",
        "RUN",
    ]);
    assert_eq!(out, "F\n");
}

#[test]
fn computed_goto() {
    let out = session(&[
        "10 X=30 : GOTO X",
        "20 PRINT \"N\"",
        "30 PRINT \"Y\"",
        "RUN",
    ]);
    assert_eq!(out, "Y\n");
}

#[test]
fn on_gosub_returns_past_the_list() {
    let out = session(&[
        "10 ON 2 GOSUB 100,200 : PRINT \"E\" : END",
        "100 PRINT \"A\" : RETURN",
        "200 PRINT \"B\" : RETURN",
        "RUN",
    ]);
    assert_eq!(out, "B\nE\n");
}

#[test]
fn next_with_outer_variable_discards_inner_frames() {
    let out = session(&[
        "10 FOR I=1 TO 2",
        "20 FOR J=1 TO 2",
        "30 NEXT I",
        "40 PRINT \"DONE\"",
        "RUN",
    ]);
    assert_eq!(out, "DONE\n");
}

#[test]
fn if_false_skips_the_rest_of_the_line() {
    let out = session(&[
        "10 IF 0 THEN PRINT \"A\" : PRINT \"B\"",
        "20 PRINT \"C\"",
        "RUN",
    ]);
    assert_eq!(out, "C\n");
}

#[test]
fn if_goto_form() {
    let out = session(&["10 IF 1 GOTO 30", "20 PRINT \"N\"", "30 PRINT \"Y\"", "RUN"]);
    assert_eq!(out, "Y\n");
}

#[test]
fn print_zones_and_tab() {
    let out = session(&["10 PRINT 1,2", "RUN"]);
    assert_eq!(out, format!("{:<10}{}\n", " 1 ", " 2 "));
    let out = session(&["10 PRINT TAB(5);\"X\"", "RUN"]);
    assert_eq!(out, "     X\n");
}

#[test]
fn string_functions() {
    let out = session(&[
        "10 A$=\"HELLO\" : PRINT LEFT$(A$,2);MID$(A$,2,3);RIGHT$(A$,1)",
        "RUN",
    ]);
    assert_eq!(out, "HEELLO\n");
    let out = session(&["10 PRINT CHR$(65);ASC(\"B\")", "RUN"]);
    assert_eq!(out, "A 66 \n");
    let out = session(&["10 PRINT STR$(12)+\"!\";VAL(\"3.5\")", "RUN"]);
    assert_eq!(out, " 12! 3.5 \n");
}

#[test]
fn def_fn_binding_is_restored() {
    let out = session(&[
        "10 DEF FN A(X)=X+B",
        "20 X=10 : B=1",
        "30 PRINT FN A(5);X",
        "RUN",
    ]);
    assert_eq!(out, " 6  10 \n");
}

#[test]
fn input_parses_items() {
    let out = session_full(
        Configuration::default(),
        &["10 INPUT \"AB\";A,B$", "20 PRINT A;B$", "RUN"],
        &["5,HI"],
        &[],
    );
    assert_eq!(out, "AB?  5 HI\n");
}

#[test]
fn input_redo_from_start() {
    let out = session_full(
        Configuration::default(),
        &["10 INPUT A", "20 PRINT A", "RUN"],
        &["NOPE", "7"],
        &[],
    );
    assert_eq!(out, "? ?REDO FROM START\n?  7 \n");
}

#[test]
fn get_reads_a_key_or_nothing() {
    let out = session_full(
        Configuration::default(),
        &["10 GET K$ : PRINT K$ : GET N : PRINT N", "RUN"],
        &[],
        &[b'A'],
    );
    assert_eq!(out, "A\n 0 \n");
}

#[test]
fn peek_and_poke() {
    let out = session(&["10 POKE 4096,77 : PRINT PEEK(4096)", "RUN"]);
    assert_eq!(out, " 77 \n");
}

#[test]
fn unary_minus_binds_tighter_than_power() {
    let out = session(&["10 PRINT -2^2", "RUN"]);
    assert_eq!(out, " 4 \n");
}

#[test]
fn logical_operators() {
    let out = session(&["10 PRINT NOT 0;1 AND 3;2 OR 4", "RUN"]);
    assert_eq!(out, "-1  1  6 \n");
    let out = session(&["10 IF \"A\"<\"B\" THEN PRINT \"Y\"", "RUN"]);
    assert_eq!(out, "Y\n");
}

#[test]
fn error_messages_carry_the_line() {
    let out = session(&["10 PRINT 1/0", "RUN"]);
    assert_eq!(out, "?DIVISION BY ZERO ERROR IN 10\n");
    let out = session(&["10 RETURN", "RUN"]);
    assert_eq!(out, "?RETURN WITHOUT GOSUB ERROR IN 10\n");
    let out = session(&["10 GOTO 999", "RUN"]);
    assert_eq!(out, "?UNDEF'D STATEMENT ERROR IN 10\n");
    let out = session(&["10 READ A", "RUN"]);
    assert_eq!(out, "?OUT OF DATA ERROR IN 10\n");
    let out = session(&["10 PRINT 1E30*1E30", "RUN"]);
    assert_eq!(out, "?OVERFLOW ERROR IN 10\n");
    let out = session(&["10 A$=1", "RUN"]);
    assert_eq!(out, "?TYPE MISMATCH ERROR IN 10\n");
}

#[test]
fn array_errors_and_access() {
    let out = session(&["10 DIM A(5) : DIM A(5)", "RUN"]);
    assert_eq!(out, "?REDIM'D ARRAY ERROR IN 10\n");
    let out = session(&["10 DIM A(5) : A(6)=1", "RUN"]);
    assert_eq!(out, "?BAD SUBSCRIPT ERROR IN 10\n");
    let out = session(&[
        "10 DIM M(2,3)",
        "20 M(1,2)=7 : M(2,3)=9",
        "30 PRINT M(1,2);M(2,3);M(0,0)",
        "RUN",
    ]);
    assert_eq!(out, " 7  9  0 \n");
    // auto-dimension to ten on first touch
    let out = session(&["10 Q(10)=3 : PRINT Q(10)", "RUN"]);
    assert_eq!(out, " 3 \n");
    let out = session(&["10 Q(11)=3", "RUN"]);
    assert_eq!(out, "?BAD SUBSCRIPT ERROR IN 10\n");
}

#[test]
fn restore_to_a_line() {
    let out = session(&["10 DATA 1", "20 DATA 2", "30 RESTORE 20 : READ A : PRINT A", "RUN"]);
    assert_eq!(out, " 2 \n");
}

#[test]
fn stop_and_cont() {
    let out = session(&["10 PRINT \"A\" : STOP : PRINT \"B\"", "RUN", "CONT"]);
    assert_eq!(out, "A\n\nBREAK IN 10\nB\n");
    let out = session(&["CONT"]);
    assert_eq!(out, "?CAN'T CONTINUE ERROR\n");
}

#[test]
fn direct_mode_restrictions() {
    let out = session(&["INPUT A"]);
    assert_eq!(out, "?ILLEGAL DIRECT ERROR\n");
    let out = session(&["PRINT +"]);
    assert_eq!(out, "?SYNTAX ERROR\n");
}

#[test]
fn edits_and_list() {
    let out = session(&[
        "10 print \"A\"",
        "20 PRINT \"B\"",
        "10",
        "LIST",
    ]);
    assert_eq!(out, "20 PRINT \"B\"\n");
    let out = session(&["10 PRINT \"HI\"", "LIST", "RUN"]);
    assert_eq!(out, "10 PRINT \"HI\"\nHI\n");
}

#[test]
fn clear_keeps_the_program() {
    let out = session(&["10 PRINT \"X\"", "CLEAR", "RUN"]);
    assert_eq!(out, "X\n");
}

#[test]
fn save_new_load_round_trip() {
    let files = Rc::new(RefCell::new(HashMap::new()));
    let (mut basic, out) = machine(Configuration::default(), &[], &[]);
    basic.attach_storage(Box::new(MemStore(Rc::clone(&files))));
    basic.execute_line("10 PRINT \"PERSIST\"");
    basic.execute_line("SAVE \"T\"");
    basic.execute_line("NEW");
    basic.execute_line("RUN");
    basic.execute_line("LOAD \"T\"");
    basic.execute_line("RUN");
    let text = String::from_utf8_lossy(&out.borrow()).into_owned();
    assert_eq!(text, "PERSIST\n");
    assert!(files.borrow().contains_key("T"));

    let (mut basic, out) = machine(Configuration::default(), &[], &[]);
    basic.attach_storage(Box::new(MemStore(Rc::new(RefCell::new(HashMap::new())))));
    basic.execute_line("LOAD \"NOPE\"");
    let text = String::from_utf8_lossy(&out.borrow()).into_owned();
    assert_eq!(text, "?FILE NOT FOUND ERROR\n");
}

#[test]
fn pointer_invariant_holds_after_a_run() {
    let (mut basic, _out) = machine(Configuration::default(), &[], &[]);
    basic.execute_line("10 DIM A$(5) : FOR I=1 TO 50 : B$=B$+\"Y\" : NEXT");
    basic.execute_line("20 A$(3)=B$ : C=FRE(0)");
    basic.execute_line("RUN");
    assert!(basic.memory().pointers_ordered());
}

#[test]
fn fre_reports_string_space() {
    let out = session(&["10 IF FRE(0)>1000 THEN PRINT \"OK\"", "RUN"]);
    assert_eq!(out, "OK\n");
}

#[test]
fn jiffy_clock_reads_and_sets() {
    let out = session(&["10 TI$=\"010203\" : PRINT TI$", "RUN"]);
    assert_eq!(out, "010203\n");
    let out = session(&["10 IF TI>=0 THEN PRINT \"T\"", "RUN"]);
    assert_eq!(out, "T\n");
}

#[test]
fn rnd_is_seed_reproducible() {
    let program = &[
        "10 A=RND(-3) : B=RND(1) : C=RND(0)",
        "20 D=RND(-3) : E=RND(1)",
        "30 IF B=E THEN IF B=C THEN IF B<1 THEN IF B>=0 THEN PRINT \"SAME\"",
        "RUN",
    ];
    assert_eq!(session(program), "SAME\n");
}

#[test]
fn sys_and_usr_hooks() {
    let (mut basic, out) = machine(Configuration::default(), &[], &[]);
    // without hooks SYS is a no-op and USR is the identity
    basic.execute_line("10 SYS 4096 : PRINT USR(7)");
    basic.execute_line("RUN");
    assert_eq!(String::from_utf8_lossy(&out.borrow()).into_owned(), " 7 \n");

    let (mut basic, out) = machine(Configuration::default(), &[], &[]);
    basic.install_usr(Box::new(|x| x * 2.0));
    basic.install_sys(Box::new(|mem, addr| mem.write(addr, 99)));
    basic.execute_line("10 SYS 4096 : PRINT USR(7);PEEK(4096)");
    basic.execute_line("RUN");
    assert_eq!(String::from_utf8_lossy(&out.borrow()).into_owned(), " 14  99 \n");
}
