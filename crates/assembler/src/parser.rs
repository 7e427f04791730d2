//! Parser for listing tokens → declarations, headers and body items.
//!
//! Dispatches on the first token: `.directive`, `name:` mark, or an
//! operation mnemonic.

use cilcheck_common::op::{ALL_BINARY_OPS, ALL_BRANCH_COMPARES, ALL_COMPARE_OPS};
use cilcheck_common::type_value::ALL_ELEMENT_TYPES;
use cilcheck_common::{FieldRef, MethodRef, MethodSignature, Op, Type};

use crate::error::AsmError;
use crate::lexer::Token;
use crate::listing::{BranchOp, Instr, Item, LocalOp, MethodHeader, TypeDecl};

/// Result of parsing a single listing line.
#[derive(Debug, PartialEq)]
pub(crate) enum Parsed {
    Decl(TypeDecl),
    Method(MethodHeader),
    /// A mark may share its line with an operation, hence more than one.
    Body(Vec<Item>),
}

/// Parse a sequence of tokens from a single line.
///
/// Returns `Ok(None)` for blank lines (empty token list).
pub(crate) fn parse_line(tokens: &[Token], line: usize) -> Result<Option<Parsed>, AsmError> {
    let Some(first) = tokens.first() else {
        return Ok(None);
    };
    match first {
        Token::Mark(name) => {
            let mut items = vec![Item::Mark(name.clone())];
            if tokens.len() > 1 {
                let mut ops = Operands::new(&tokens[1..], line)?;
                items.push(Item::Instr(parse_instr(&mut ops)?));
            }
            Ok(Some(Parsed::Body(items)))
        }
        Token::Word(w) if w.starts_with('.') => parse_directive(tokens, line).map(Some),
        Token::Word(_) => {
            let mut ops = Operands::new(tokens, line)?;
            let instr = parse_instr(&mut ops)?;
            Ok(Some(Parsed::Body(vec![Item::Instr(instr)])))
        }
        other => Err(AsmError::UnexpectedToken {
            line,
            token: other.text(),
        }),
    }
}

fn parse_directive(tokens: &[Token], line: usize) -> Result<Parsed, AsmError> {
    let mut ops = Operands::new(tokens, line)?;
    let directive = ops.mnemonic.clone();
    let parsed = match directive.as_str() {
        ".class" => {
            let name = ops.expect_word("a class name")?.to_string();
            let mut base = None;
            let mut interfaces = Vec::new();
            if ops.eat_word("extends") {
                base = Some(ops.expect_word("a base class")?.to_string());
            }
            if ops.eat_word("implements") {
                interfaces.push(ops.expect_word("an interface name")?.to_string());
                while ops.eat_punct(',') {
                    interfaces.push(ops.expect_word("an interface name")?.to_string());
                }
            }
            Parsed::Decl(TypeDecl::Class {
                name,
                base,
                interfaces,
            })
        }
        ".interface" => Parsed::Decl(TypeDecl::Interface {
            name: ops.expect_word("an interface name")?.to_string(),
        }),
        ".valuetype" => Parsed::Decl(TypeDecl::ValueType {
            name: ops.expect_word("a value type name")?.to_string(),
        }),
        ".method" => Parsed::Method(parse_method_header(&mut ops)?),
        ".local" => {
            let name = ops.expect_word("a local name and type")?.to_string();
            let ty = ops.expect_type("a local type")?;
            Parsed::Body(vec![Item::Local { name, ty }])
        }
        ".try" => Parsed::Body(vec![Item::Try]),
        ".catch" => Parsed::Body(vec![Item::Catch(ops.expect_type("an exception type")?)]),
        ".catchall" => Parsed::Body(vec![Item::CatchAll]),
        ".endcatch" => Parsed::Body(vec![Item::EndCatch]),
        ".finally" => Parsed::Body(vec![Item::Finally]),
        ".endfinally" => Parsed::Body(vec![Item::EndFinally]),
        ".endtry" => Parsed::Body(vec![Item::EndTry]),
        other => {
            return Err(AsmError::UnknownDirective {
                line,
                token: other.to_string(),
            })
        }
    };
    ops.expect_end()?;
    Ok(parsed)
}

/// `[static | instance <Type>] <ret|void> Name(<params>)`
fn parse_method_header(ops: &mut Operands<'_>) -> Result<MethodHeader, AsmError> {
    let line = ops.line;
    let declaring = if ops.eat_word("instance") {
        Some(ops.expect_type("a declaring type")?)
    } else {
        ops.eat_word("static");
        None
    };
    let returns = ops.expect_return_type()?;
    let name = ops.expect_word("a method name")?.to_string();
    let params = ops.expect_params()?;
    let signature = match declaring {
        Some(ty) => MethodSignature::new_instance(ty, params, returns),
        None => MethodSignature::new_static(params, returns),
    };
    Ok(MethodHeader {
        name,
        signature,
        line,
    })
}

fn parse_instr(ops: &mut Operands<'_>) -> Result<Instr, AsmError> {
    let mnemonic = ops.mnemonic.to_ascii_lowercase();

    if let Some(op) = ALL_BINARY_OPS.iter().find(|o| o.mnemonic() == mnemonic) {
        ops.expect_end()?;
        return Ok(Instr::Plain(Op::Binary(*op)));
    }
    if let Some(op) = ALL_COMPARE_OPS.iter().find(|o| o.mnemonic() == mnemonic) {
        ops.expect_end()?;
        return Ok(Instr::Plain(Op::Compare(*op)));
    }
    if let Some(cmp) = ALL_BRANCH_COMPARES.iter().find(|o| o.mnemonic() == mnemonic) {
        let target = ops.expect_word("a label")?.to_string();
        ops.expect_end()?;
        return Ok(Instr::Branch(BranchOp::If(*cmp), target));
    }
    if let Some(suffix) = mnemonic.strip_prefix("conv.") {
        let et = ALL_ELEMENT_TYPES
            .iter()
            .find(|et| et.conv_suffix() == Some(suffix))
            .ok_or_else(|| AsmError::UnknownMnemonic {
                line: ops.line,
                token: ops.mnemonic.clone(),
            })?;
        ops.expect_end()?;
        return Ok(Instr::Plain(Op::Conv(*et)));
    }

    let instr = match mnemonic.as_str() {
        "nop" => Instr::Plain(Op::Nop),
        "dup" => Instr::Plain(Op::Dup),
        "pop" => Instr::Plain(Op::Pop),
        "ldc.i4" => Instr::Plain(Op::LdcI4(ops.expect_i32()?)),
        "ldc.i8" => Instr::Plain(Op::LdcI8(ops.expect_int("an integer")?)),
        "ldc.r4" => Instr::Plain(Op::LdcR4(ops.expect_float()? as f32)),
        "ldc.r8" => Instr::Plain(Op::LdcR8(ops.expect_float()?)),
        "ldstr" => Instr::Plain(Op::LdStr(ops.expect_string()?)),
        "ldnull" => Instr::Plain(Op::LdNull),
        "ldarg" => Instr::Plain(Op::LdArg(ops.expect_u16()?)),
        "ldarga" => Instr::Plain(Op::LdArgA(ops.expect_u16()?)),
        "starg" => Instr::Plain(Op::StArg(ops.expect_u16()?)),
        "ldloc" => Instr::Local(LocalOp::Load, ops.expect_name("a local")?),
        "ldloca" => Instr::Local(LocalOp::Address, ops.expect_name("a local")?),
        "stloc" => Instr::Local(LocalOp::Store, ops.expect_name("a local")?),
        "neg" => Instr::Plain(Op::Neg),
        "not" => Instr::Plain(Op::Not),
        "br" => Instr::Branch(BranchOp::Br, ops.expect_word("a label")?.to_string()),
        "brtrue" => Instr::Branch(BranchOp::BrTrue, ops.expect_word("a label")?.to_string()),
        "brfalse" => Instr::Branch(BranchOp::BrFalse, ops.expect_word("a label")?.to_string()),
        "leave" => Instr::Branch(BranchOp::Leave, ops.expect_word("a label")?.to_string()),
        "switch" => Instr::Switch(ops.expect_label_list()?),
        "ret" => Instr::Plain(Op::Ret),
        "throw" => Instr::Plain(Op::Throw),
        "rethrow" => Instr::Plain(Op::Rethrow),
        "endfinally" => Instr::Plain(Op::EndFinally),
        "call" => Instr::Plain(Op::Call(ops.expect_method()?)),
        "callvirt" => Instr::Plain(Op::CallVirt(ops.expect_method()?)),
        "newobj" => Instr::Plain(Op::NewObj(ops.expect_constructor()?)),
        "ldfld" => Instr::Plain(Op::LdFld(ops.expect_field(false)?)),
        "ldflda" => Instr::Plain(Op::LdFldA(ops.expect_field(false)?)),
        "stfld" => Instr::Plain(Op::StFld(ops.expect_field(false)?)),
        "ldsfld" => Instr::Plain(Op::LdsFld(ops.expect_field(true)?)),
        "stsfld" => Instr::Plain(Op::StsFld(ops.expect_field(true)?)),
        "newarr" => Instr::Plain(Op::NewArr(ops.expect_type("an element type")?)),
        "ldlen" => Instr::Plain(Op::LdLen),
        "ldelem" => Instr::Plain(Op::LdElem(ops.expect_type("an element type")?)),
        "ldelema" => Instr::Plain(Op::LdElemA(ops.expect_type("an element type")?)),
        "stelem" => Instr::Plain(Op::StElem(ops.expect_type("an element type")?)),
        "box" => Instr::Plain(Op::Box(ops.expect_type("a value type")?)),
        "unbox.any" => Instr::Plain(Op::UnboxAny(ops.expect_type("a type")?)),
        "castclass" => Instr::Plain(Op::CastClass(ops.expect_type("a type")?)),
        "isinst" => Instr::Plain(Op::IsInst(ops.expect_type("a type")?)),
        "ldind" => Instr::Plain(Op::LdInd(ops.expect_type("a type")?)),
        "stind" => Instr::Plain(Op::StInd(ops.expect_type("a type")?)),
        _ => {
            return Err(AsmError::UnknownMnemonic {
                line: ops.line,
                token: ops.mnemonic.clone(),
            })
        }
    };
    ops.expect_end()?;
    Ok(instr)
}

/// The operand tokens of one line, consumed left to right.
struct Operands<'a> {
    mnemonic: String,
    rest: &'a [Token],
    line: usize,
}

impl<'a> Operands<'a> {
    fn new(tokens: &'a [Token], line: usize) -> Result<Self, AsmError> {
        match tokens.split_first() {
            Some((Token::Word(w), rest)) => Ok(Self {
                mnemonic: w.clone(),
                rest,
                line,
            }),
            Some((other, _)) => Err(AsmError::UnexpectedToken {
                line,
                token: other.text(),
            }),
            None => Err(AsmError::UnexpectedToken {
                line,
                token: String::new(),
            }),
        }
    }

    fn missing(&self, expected: &'static str) -> AsmError {
        AsmError::MissingOperand {
            line: self.line,
            mnemonic: self.mnemonic.clone(),
            expected,
        }
    }

    fn unexpected(&self, token: &Token) -> AsmError {
        AsmError::UnexpectedToken {
            line: self.line,
            token: token.text(),
        }
    }

    fn next(&mut self, expected: &'static str) -> Result<&'a Token, AsmError> {
        let (first, rest) = self.rest.split_first().ok_or_else(|| self.missing(expected))?;
        self.rest = rest;
        Ok(first)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        match self.rest.split_first() {
            Some((Token::Word(w), rest)) if w == word => {
                self.rest = rest;
                true
            }
            _ => false,
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        match self.rest.split_first() {
            Some((Token::Punct(p), rest)) if *p == c => {
                self.rest = rest;
                true
            }
            _ => false,
        }
    }

    fn expect_punct(&mut self, c: char, expected: &'static str) -> Result<(), AsmError> {
        match self.next(expected)? {
            Token::Punct(p) if *p == c => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_word(&mut self, expected: &'static str) -> Result<&'a str, AsmError> {
        match self.next(expected)? {
            Token::Word(w) => Ok(w.as_str()),
            other => Err(self.unexpected(other)),
        }
    }

    /// A local: its declared name or its slot number.
    fn expect_name(&mut self, expected: &'static str) -> Result<String, AsmError> {
        match self.next(expected)? {
            Token::Word(w) => Ok(w.clone()),
            Token::Int(n) if *n >= 0 => Ok(n.to_string()),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_type(&mut self, expected: &'static str) -> Result<Type, AsmError> {
        let line = self.line;
        self.expect_word(expected)?
            .parse()
            .map_err(|source| AsmError::InvalidType { line, source })
    }

    fn expect_return_type(&mut self) -> Result<Option<Type>, AsmError> {
        if self.eat_word("void") {
            return Ok(None);
        }
        self.expect_type("a return type").map(Some)
    }

    fn expect_int(&mut self, expected: &'static str) -> Result<i64, AsmError> {
        match self.next(expected)? {
            Token::Int(n) => Ok(*n),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_i32(&mut self) -> Result<i32, AsmError> {
        let n = self.expect_int("a 32-bit integer")?;
        i32::try_from(n)
            .or_else(|_| u32::try_from(n).map(|u| u as i32))
            .map_err(|_| AsmError::InvalidNumber {
                line: self.line,
                token: n.to_string(),
            })
    }

    fn expect_u16(&mut self) -> Result<u16, AsmError> {
        let n = self.expect_int("an argument index")?;
        u16::try_from(n).map_err(|_| AsmError::InvalidNumber {
            line: self.line,
            token: n.to_string(),
        })
    }

    fn expect_float(&mut self) -> Result<f64, AsmError> {
        match self.next("a number")? {
            Token::Float(x) => Ok(*x),
            Token::Int(n) => Ok(*n as f64),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_string(&mut self) -> Result<String, AsmError> {
        match self.next("a string literal")? {
            Token::Str(s) => Ok(s.clone()),
            other => Err(self.unexpected(other)),
        }
    }

    /// `(T1, T2, ...)`, possibly empty.
    fn expect_params(&mut self) -> Result<Vec<Type>, AsmError> {
        self.expect_punct('(', "a parameter list")?;
        let mut params = Vec::new();
        if self.eat_punct(')') {
            return Ok(params);
        }
        loop {
            params.push(self.expect_type("a parameter type")?);
            if self.eat_punct(')') {
                return Ok(params);
            }
            self.expect_punct(',', "',' or ')'")?;
        }
    }

    /// `(a, b, ...)`
    fn expect_label_list(&mut self) -> Result<Vec<String>, AsmError> {
        self.expect_punct('(', "a label list")?;
        let mut labels = Vec::new();
        if self.eat_punct(')') {
            return Ok(labels);
        }
        loop {
            labels.push(self.expect_word("a label")?.to_string());
            if self.eat_punct(')') {
                return Ok(labels);
            }
            self.expect_punct(',', "',' or ')'")?;
        }
    }

    /// `Type::member`
    fn expect_member(&mut self, expected: &'static str) -> Result<(Type, String), AsmError> {
        let line = self.line;
        let word = self.expect_word(expected)?;
        let Some((owner, member)) = word.rsplit_once("::") else {
            return Err(AsmError::UnexpectedToken {
                line,
                token: word.to_string(),
            });
        };
        let owner = owner
            .parse()
            .map_err(|source| AsmError::InvalidType { line, source })?;
        Ok((owner, member.to_string()))
    }

    /// `[static] <ret|void> Type::Name(<params>)`
    fn expect_method(&mut self) -> Result<MethodRef, AsmError> {
        let is_static = self.eat_word("static");
        let returns = self.expect_return_type()?;
        let (declaring, name) = self.expect_member("a method reference")?;
        let params = self.expect_params()?;
        Ok(MethodRef::new(declaring, &name, params, returns, is_static))
    }

    /// `Type(<params>)`
    fn expect_constructor(&mut self) -> Result<MethodRef, AsmError> {
        let declaring = self.expect_type("a constructed type")?;
        let params = self.expect_params()?;
        Ok(MethodRef::constructor(declaring, params))
    }

    /// `<type> Type::name`
    fn expect_field(&mut self, is_static: bool) -> Result<FieldRef, AsmError> {
        let ty = self.expect_type("a field type")?;
        let (declaring, name) = self.expect_member("a field reference")?;
        Ok(FieldRef::new(declaring, &name, ty, is_static))
    }

    fn expect_end(&self) -> Result<(), AsmError> {
        match self.rest.first() {
            Some(token) => Err(self.unexpected(token)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize_line;
    use cilcheck_common::{BinaryOp, BranchCompare, CompareOp, ElementType};

    fn parse(text: &str) -> Result<Option<Parsed>, AsmError> {
        parse_line(&tokenize_line(text, 1)?, 1)
    }

    fn instr(text: &str) -> Instr {
        match parse(text).unwrap() {
            Some(Parsed::Body(mut items)) => match items.pop() {
                Some(Item::Instr(i)) => i,
                other => panic!("expected instruction, got {other:?}"),
            },
            other => panic!("expected body, got {other:?}"),
        }
    }

    fn int32() -> Type {
        Type::Element(ElementType::I4)
    }

    #[test]
    fn blank_line() {
        assert_eq!(parse("   ; nothing").unwrap(), None);
    }

    #[test]
    fn simple_operations() {
        assert_eq!(instr("add"), Instr::Plain(Op::Binary(BinaryOp::Add)));
        assert_eq!(instr("CGT.UN"), Instr::Plain(Op::Compare(CompareOp::CgtUn)));
        assert_eq!(instr("conv.r8"), Instr::Plain(Op::Conv(ElementType::R8)));
        assert_eq!(instr("ldc.i4 -3"), Instr::Plain(Op::LdcI4(-3)));
        assert_eq!(instr("ldc.i4 0xffffffff"), Instr::Plain(Op::LdcI4(-1)));
        assert_eq!(instr("ldc.r8 1"), Instr::Plain(Op::LdcR8(1.0)));
        assert_eq!(instr("ldstr \"hi\""), Instr::Plain(Op::LdStr("hi".into())));
    }

    #[test]
    fn label_and_local_operands() {
        assert_eq!(
            instr("bge.un done"),
            Instr::Branch(BranchOp::If(BranchCompare::BgeUn), "done".to_string())
        );
        assert_eq!(
            instr("switch (a, b)"),
            Instr::Switch(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(instr("ldloc 0"), Instr::Local(LocalOp::Load, "0".to_string()));
        assert_eq!(instr("stloc sum"), Instr::Local(LocalOp::Store, "sum".to_string()));
    }

    #[test]
    fn mark_with_instruction() {
        assert_eq!(
            parse("loop: ldarg 0").unwrap(),
            Some(Parsed::Body(vec![
                Item::Mark("loop".to_string()),
                Item::Instr(Instr::Plain(Op::LdArg(0))),
            ]))
        );
    }

    #[test]
    fn member_references() {
        assert_eq!(
            instr("call static int32 Math::Max(int32, int32)"),
            Instr::Plain(Op::Call(MethodRef::new(
                Type::named("Math"),
                "Max",
                vec![int32(), int32()],
                Some(int32()),
                true
            )))
        );
        assert_eq!(
            instr("newobj Point(int32, int32)"),
            Instr::Plain(Op::NewObj(MethodRef::constructor(
                Type::named("Point"),
                vec![int32(), int32()]
            )))
        );
        assert_eq!(
            instr("ldsfld int32 Config::count"),
            Instr::Plain(Op::LdsFld(FieldRef::new(
                Type::named("Config"),
                "count",
                int32(),
                true
            )))
        );
    }

    #[test]
    fn method_headers() {
        match parse(".method static int32 Add(int32, int32)").unwrap() {
            Some(Parsed::Method(header)) => {
                assert_eq!(header.name, "Add");
                assert_eq!(header.signature.arg_count(), 2);
            }
            other => panic!("expected header, got {other:?}"),
        }
        match parse(".method instance Point void Reset()").unwrap() {
            Some(Parsed::Method(header)) => {
                assert_eq!(
                    header.signature,
                    MethodSignature::new_instance(Type::named("Point"), vec![], None)
                );
            }
            other => panic!("expected header, got {other:?}"),
        }
    }

    #[test]
    fn class_declaration() {
        assert_eq!(
            parse(".class Dog extends Animal implements IPet, IFriend").unwrap(),
            Some(Parsed::Decl(TypeDecl::Class {
                name: "Dog".to_string(),
                base: Some("Animal".to_string()),
                interfaces: vec!["IPet".to_string(), "IFriend".to_string()],
            }))
        );
    }

    #[test]
    fn region_directives() {
        assert_eq!(parse(".try").unwrap(), Some(Parsed::Body(vec![Item::Try])));
        assert_eq!(
            parse(".catch Exception").unwrap(),
            Some(Parsed::Body(vec![Item::Catch(Type::named("Exception"))]))
        );
        assert_eq!(parse(".endtry").unwrap(), Some(Parsed::Body(vec![Item::EndTry])));
    }

    #[test]
    fn errors() {
        assert!(matches!(
            parse("frobnicate").unwrap_err(),
            AsmError::UnknownMnemonic { .. }
        ));
        assert!(matches!(
            parse(".bogus").unwrap_err(),
            AsmError::UnknownDirective { .. }
        ));
        assert!(matches!(
            parse("ldc.i4").unwrap_err(),
            AsmError::MissingOperand { .. }
        ));
        assert!(matches!(
            parse("add 1").unwrap_err(),
            AsmError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse("ldc.i4 5000000000").unwrap_err(),
            AsmError::InvalidNumber { .. }
        ));
        assert!(matches!(
            parse("conv.zz").unwrap_err(),
            AsmError::UnknownMnemonic { .. }
        ));
        assert!(matches!(
            parse("newarr a-b").unwrap_err(),
            AsmError::InvalidType { .. }
        ));
    }
}
