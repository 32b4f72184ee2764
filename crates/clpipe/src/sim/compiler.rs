//! Source scanner for the simulated device compiler.
//!
//! This is not an OpenCL C compiler. It does what the host side can observe
//! of one: it accepts or rejects a program, reports diagnostics in the
//! `<source>:line:col: error: ...` shape real drivers use, and extracts each
//! kernel's name and parameter list so argument binding can be checked.
//! Type names it does not know (typedefs, macros) pass through untyped.

use std::fmt::Write as _;

use super::SimDeviceSpec;

// ── Types ───────────────────────────────────────────────────────────────────

/// Scalar element types of OpenCL C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Half,
    Float,
    Double,
    SizeT,
}

impl ScalarType {
    fn from_base(name: &str) -> Option<Self> {
        Some(match name {
            "char" => Self::Char,
            "uchar" => Self::UChar,
            "short" => Self::Short,
            "ushort" => Self::UShort,
            "int" => Self::Int,
            "uint" => Self::UInt,
            "long" => Self::Long,
            "ulong" => Self::ULong,
            "half" => Self::Half,
            "float" => Self::Float,
            "double" => Self::Double,
            "size_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t" => Self::SizeT,
            _ => return None,
        })
    }

    fn unsigned(self) -> Self {
        match self {
            Self::Char => Self::UChar,
            Self::Short => Self::UShort,
            Self::Int => Self::UInt,
            Self::Long => Self::ULong,
            other => other,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort | Self::Half => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Long | Self::ULong | Self::Double | Self::SizeT => 8,
        }
    }
}

/// A scalar or vector type such as `double` or `float4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElemType {
    pub scalar: ScalarType,
    pub width: usize,
}

impl ElemType {
    /// Parse `float`, `double2`, `uint16`, ...
    fn parse(name: &str) -> Option<Self> {
        if let Some(scalar) = ScalarType::from_base(name) {
            return Some(Self { scalar, width: 1 });
        }
        let split = name.find(|c: char| c.is_ascii_digit())?;
        let (base, digits) = name.split_at(split);
        let width: usize = digits.parse().ok()?;
        if !matches!(width, 2 | 3 | 4 | 8 | 16) {
            return None;
        }
        ScalarType::from_base(base)
            .filter(|s| *s != ScalarType::SizeT)
            .map(|scalar| Self { scalar, width })
    }

    pub fn size(self) -> usize {
        // 3-component vectors occupy the space of 4.
        let lanes = if self.width == 3 { 4 } else { self.width };
        self.scalar.size() * lanes
    }

    pub fn is_double(self) -> bool {
        self.scalar == ScalarType::Double
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Private,
    Global,
    Constant,
    Local,
}

impl AddressSpace {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Private => "__private",
            Self::Global => "__global",
            Self::Constant => "__constant",
            Self::Local => "__local",
        }
    }
}

/// How a parameter is passed. `elem` is `None` for type names the scanner
/// does not recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// A pointer into device memory.
    Pointer { space: AddressSpace, elem: Option<ElemType>, is_const: bool },
    /// A by-value argument.
    Value(Option<ElemType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub params: Vec<Param>,
}

/// A program that built successfully.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub kernels: Vec<KernelSignature>,
    /// Warnings; empty for a clean build.
    pub log: String,
}

// ── Diagnostics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Warning,
}

struct Diagnostics<'s> {
    lines: Vec<&'s str>,
    entries: Vec<(Option<(usize, usize)>, Severity, String)>,
}

impl<'s> Diagnostics<'s> {
    fn new(source: &'s str) -> Self {
        Self { lines: source.lines().collect(), entries: Vec::new() }
    }

    fn error(&mut self, at: Option<(usize, usize)>, message: impl Into<String>) {
        self.entries.push((at, Severity::Error, message.into()));
    }

    fn warning(&mut self, at: Option<(usize, usize)>, message: impl Into<String>) {
        self.entries.push((at, Severity::Warning, message.into()));
    }

    fn error_count(&self) -> usize {
        self.entries.iter().filter(|(_, severity, _)| *severity == Severity::Error).count()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (at, severity, message) in &self.entries {
            let label = match severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            match *at {
                Some((line, col)) => {
                    let _ = writeln!(out, "<source>:{line}:{col}: {label}: {message}");
                    if let Some(text) = self.lines.get(line - 1) {
                        let _ = writeln!(out, "{text}");
                        let _ = writeln!(out, "{}^", " ".repeat(col.saturating_sub(1)));
                    }
                }
                None => {
                    let _ = writeln!(out, "{label}: {message}");
                }
            }
        }
        match self.error_count() {
            0 => {}
            1 => out.push_str("1 error generated.\n"),
            n => {
                let _ = writeln!(out, "{n} errors generated.");
            }
        }
        out
    }
}

// ── Scanning ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Other,
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    col: usize,
}

impl Token {
    fn at(&self) -> Option<(usize, usize)> {
        Some((self.line, self.col))
    }

    fn ident(&self) -> Option<&str> {
        match &self.tok {
            Tok::Ident(s) => Some(s),
            _ => None,
        }
    }

    fn is_punct(&self, c: char) -> bool {
        self.tok == Tok::Punct(c)
    }
}

/// Replace comments with spaces, keeping line structure.
fn strip_comments(source: &str, diags: &mut Diagnostics<'_>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut block_start: Option<(usize, usize)> = None;
    let mut in_line_comment = false;
    let (mut line, mut col) = (1usize, 1usize);
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        let here = (line, col);
        if c == '\n' {
            line += 1;
            col = 1;
            in_line_comment = false;
            out.push('\n');
            continue;
        }
        col += 1;

        if block_start.is_some() {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                col += 1;
                out.push(' ');
                block_start = None;
            }
            out.push(' ');
        } else if in_line_comment {
            out.push(' ');
        } else if c == '/' && chars.peek() == Some(&'/') {
            in_line_comment = true;
            out.push(' ');
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            col += 1;
            out.push_str("  ");
            block_start = Some(here);
        } else {
            out.push(c);
        }
    }

    if block_start.is_some() {
        diags.error(block_start, "unterminated /* comment");
    }
    out
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let col = i + 1;
            let tok = if c.is_whitespace() {
                i += 1;
                continue;
            } else if c.is_ascii_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                Tok::Ident(chars[start..i].iter().collect())
            } else if c.is_ascii_digit() {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                Tok::Other
            } else if c == '"' || c == '\'' {
                i += 1;
                while i < chars.len() && chars[i] != c {
                    i += if chars[i] == '\\' { 2 } else { 1 };
                }
                i += 1;
                Tok::Other
            } else {
                i += 1;
                Tok::Punct(c)
            };
            tokens.push(Token { tok, line: line_idx + 1, col });
        }
    }
    tokens
}

/// Act on `#error`, `#warning` and extension pragmas, then blank every
/// directive line. Other directives are not interpreted.
fn directives(text: &str, device: &SimDeviceSpec, diags: &mut Diagnostics<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        let Some(body) = trimmed.strip_prefix('#') else {
            out.push_str(line);
            out.push('\n');
            continue;
        };

        let directive_text = body.trim_start();
        let col = line.len() - directive_text.len() + 1;
        let (directive, rest) =
            directive_text.split_once(char::is_whitespace).unwrap_or((directive_text, ""));
        let at = Some((idx + 1, col));

        match directive {
            "error" => diags.error(at, rest.trim().to_owned()),
            "warning" => diags.warning(at, rest.trim().to_owned()),
            "pragma" => check_pragma(rest, device, at, diags),
            _ => {}
        }
        out.push_str(&" ".repeat(line.len()));
        out.push('\n');
    }
    out
}

fn check_pragma(
    rest: &str,
    device: &SimDeviceSpec,
    at: Option<(usize, usize)>,
    diags: &mut Diagnostics<'_>,
) {
    let words: Vec<&str> =
        rest.split(|c: char| c.is_whitespace() || c == ':').filter(|w| !w.is_empty()).collect();
    if let ["OPENCL", "EXTENSION", extension, state] = words.as_slice() {
        if !matches!(*state, "enable" | "disable") {
            diags.warning(at, format!("expected 'enable' or 'disable' - ignoring (got '{state}')"));
        } else if *extension != "all" && !device.extensions.iter().any(|e| e.as_str() == *extension) {
            diags.warning(at, format!("unsupported OpenCL extension '{extension}' - ignoring"));
        }
    }
}

// ── Build options ───────────────────────────────────────────────────────────

const CL_STD_VERSIONS: [&str; 6] = ["CL1.0", "CL1.1", "CL1.2", "CL2.0", "CL3.0", "CLC++"];

fn check_options(options: &str, diags: &mut Diagnostics<'_>) {
    let mut words = options.split_whitespace();
    while let Some(word) = words.next() {
        match word {
            "-D" | "-I" => {
                if words.next().is_none() {
                    diags.error(None, format!("argument to '{word}' is missing (expected 1 value)"));
                }
            }
            w if w.starts_with("-D") || w.starts_with("-I") => {}
            w if w.starts_with("-cl-std=") => {
                let value = &w["-cl-std=".len()..];
                if !CL_STD_VERSIONS.contains(&value) {
                    diags.error(None, format!("invalid value '{value}' in '{w}'"));
                }
            }
            "-w" | "-Werror" | "-g" | "-cl-opt-disable" | "-cl-mad-enable"
            | "-cl-no-signed-zeros" | "-cl-unsafe-math-optimizations"
            | "-cl-finite-math-only" | "-cl-fast-relaxed-math" | "-cl-denorms-are-zero"
            | "-cl-single-precision-constant" | "-cl-kernel-arg-info"
            | "-cl-uniform-work-group-size" => {}
            other => diags.error(None, format!("unknown argument: '{other}'")),
        }
    }
}

// ── Signatures ──────────────────────────────────────────────────────────────

/// Report the first unbalanced delimiter. Returns false if one was found.
fn check_balance(tokens: &[Token], diags: &mut Diagnostics<'_>) -> bool {
    let mut stack: Vec<(char, &Token)> = Vec::new();
    for token in tokens {
        let Tok::Punct(c) = token.tok else { continue };
        let expected = match c {
            '(' | '[' | '{' => {
                stack.push((c, token));
                continue;
            }
            ')' => '(',
            ']' => '[',
            '}' => '{',
            _ => continue,
        };
        match stack.pop() {
            Some((open, _)) if open == expected => {}
            Some((open, _)) => {
                diags.error(token.at(), format!("unexpected '{c}' inside '{open}'"));
                return false;
            }
            None => {
                diags.error(token.at(), format!("extraneous closing '{c}'"));
                return false;
            }
        }
    }
    if let Some((open, token)) = stack.last() {
        diags.error(token.at(), format!("unmatched '{open}'"));
        return false;
    }
    true
}

/// Index one past the delimiter closing the opener at `open`.
fn skip_group(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    for (offset, token) in tokens[open..].iter().enumerate() {
        match token.tok {
            Tok::Punct('(' | '[' | '{') => depth += 1,
            Tok::Punct(')' | ']' | '}') => {
                depth -= 1;
                if depth == 0 {
                    return open + offset + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

fn parse_param(tokens: &[Token]) -> Param {
    let mut space = AddressSpace::Private;
    let mut is_const = false;
    let mut unsigned = false;
    let mut pointer = false;
    let mut words: Vec<&str> = Vec::new();

    for token in tokens {
        if token.is_punct('*') {
            pointer = true;
        }
        match token.ident() {
            Some("__global" | "global") => space = AddressSpace::Global,
            Some("__constant" | "constant") => space = AddressSpace::Constant,
            Some("__local" | "local") => space = AddressSpace::Local,
            Some("__private" | "private") => space = AddressSpace::Private,
            Some("const") => is_const = true,
            Some("unsigned") => unsigned = true,
            Some(
                "restrict" | "__restrict" | "volatile" | "__read_only" | "read_only"
                | "__write_only" | "write_only" | "__read_write" | "read_write",
            ) => {}
            Some(word) => words.push(word),
            None => {}
        }
    }

    // The last identifier names the parameter; the one before it is the type.
    let name = words.last().map_or_else(String::new, |w| (*w).to_owned());
    let plain_unsigned = ElemType { scalar: ScalarType::UInt, width: 1 };
    let elem = match words.len().checked_sub(2) {
        Some(i) => ElemType::parse(words[i]),
        None => unsigned.then_some(plain_unsigned),
    }
    .map(|ty| if unsigned { ElemType { scalar: ty.scalar.unsigned(), ..ty } } else { ty });

    let kind = if pointer { ParamKind::Pointer { space, elem, is_const } } else { ParamKind::Value(elem) };
    Param { name, kind }
}

fn split_params(tokens: &[Token]) -> Vec<&[Token]> {
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.tok {
            Tok::Punct('(' | '[' | '{') => depth += 1,
            Tok::Punct(')' | ']' | '}') => depth -= 1,
            Tok::Punct(',') if depth == 0 => {
                groups.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&tokens[start..]);
    groups
}

/// Signature of the kernel whose `__kernel` token is at `start`, and the
/// index after its definition. Declarations without a body yield `None`.
fn kernel_at(tokens: &[Token], start: usize) -> (Option<KernelSignature>, usize) {
    let mut open = start + 1;
    loop {
        match tokens.get(open) {
            None => return (None, tokens.len()),
            Some(t) if t.ident() == Some("__attribute__") => {
                open += 1;
                if tokens.get(open).is_some_and(|t| t.is_punct('(')) {
                    open = skip_group(tokens, open);
                }
            }
            Some(t) if t.is_punct('(') => break,
            Some(t) if t.is_punct('{') || t.is_punct(';') => return (None, open),
            Some(_) => open += 1,
        }
    }
    let Some(name) = tokens[open - 1].ident() else {
        return (None, open);
    };
    let close = skip_group(tokens, open);
    let inner = &tokens[open + 1..close.saturating_sub(1)];

    let body = tokens[close..].iter().position(|t| t.is_punct('{') || t.is_punct(';'));
    match body.map(|offset| close + offset) {
        Some(at) if tokens[at].is_punct('{') => {
            let is_void_list = inner.len() == 1 && inner[0].ident() == Some("void");
            let params = if inner.is_empty() || is_void_list {
                Vec::new()
            } else {
                split_params(inner).into_iter().map(parse_param).collect()
            };
            (Some(KernelSignature { name: name.to_owned(), params }), skip_group(tokens, at))
        }
        Some(at) => (None, at + 1),
        None => (None, tokens.len()),
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Build `source` for `device`. On failure the `Err` holds the build log.
pub fn compile(
    source: &str,
    options: &str,
    device: &SimDeviceSpec,
) -> std::result::Result<ProgramImage, String> {
    let mut diags = Diagnostics::new(source);
    check_options(options, &mut diags);

    let stripped = strip_comments(source, &mut diags);
    let code = directives(&stripped, device, &mut diags);
    let tokens = tokenize(&code);

    if !device.supports_fp64() {
        let uses_double = tokens
            .iter()
            .find(|t| t.ident().and_then(ElemType::parse).is_some_and(ElemType::is_double));
        if let Some(token) = uses_double {
            diags.error(token.at(), "use of type 'double' requires cl_khr_fp64 support");
        }
    }

    let mut kernels = Vec::new();
    if check_balance(&tokens, &mut diags) {
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].is_punct('{') {
                i = skip_group(&tokens, i);
            } else if matches!(tokens[i].ident(), Some("__kernel" | "kernel")) {
                let (signature, next) = kernel_at(&tokens, i);
                kernels.extend(signature);
                i = next.max(i + 1);
            } else {
                i += 1;
            }
        }
    }

    let log = diags.render();
    if diags.error_count() > 0 {
        Err(log)
    } else {
        Ok(ProgramImage { kernels, log })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp64_device() -> SimDeviceSpec {
        SimDeviceSpec::gpu("Test GPU")
    }

    const ADD: &str = r"
#pragma OPENCL EXTENSION cl_khr_fp64 : enable
__kernel void add(__global const double *a, __global const double *b, __global double *c)
{
    const size_t i = get_global_id(0);
    c[i] = a[i] + b[i];
}
";

    const DOUBLE: Option<ElemType> = Some(ElemType { scalar: ScalarType::Double, width: 1 });

    #[test]
    fn extracts_kernel_signature() {
        let image = compile(ADD, "", &fp64_device()).unwrap();
        assert_eq!(image.kernels.len(), 1);
        let k = &image.kernels[0];
        assert_eq!(k.name, "add");
        assert_eq!(k.params.len(), 3);
        assert_eq!(k.params[2].name, "c");
        assert_eq!(
            k.params[0].kind,
            ParamKind::Pointer { space: AddressSpace::Global, elem: DOUBLE, is_const: true }
        );
        assert!(image.log.is_empty(), "{}", image.log);
    }

    #[test]
    fn scalar_and_vector_params() {
        let src = "kernel void k(global float4 *v, const uint n, unsigned int m, float2 s) {}";
        let image = compile(src, "", &fp64_device()).unwrap();
        let params = &image.kernels[0].params;
        let uint = Some(ElemType { scalar: ScalarType::UInt, width: 1 });
        assert_eq!(params[1].kind, ParamKind::Value(uint));
        assert_eq!(params[2].kind, ParamKind::Value(uint));
        assert_eq!(params[3].kind, ParamKind::Value(Some(ElemType { scalar: ScalarType::Float, width: 2 })));
        assert!(matches!(params[0].kind, ParamKind::Pointer { elem: Some(elem), .. } if elem.size() == 16));
    }

    #[test]
    fn macro_typed_parameters_pass_through() {
        let src = "#define REAL double\n\
                   typedef int idx_t;\n\
                   __kernel void k(__global REAL *out, idx_t n) {}\n";
        let image = compile(src, "", &fp64_device()).unwrap();
        let params = &image.kernels[0].params;
        assert_eq!(params[0].name, "out");
        assert_eq!(
            params[0].kind,
            ParamKind::Pointer { space: AddressSpace::Global, elem: None, is_const: false }
        );
        assert_eq!(params[1].name, "n");
        assert_eq!(params[1].kind, ParamKind::Value(None));
    }

    #[test]
    fn attributes_do_not_hide_the_kernel_name() {
        let src = "__kernel __attribute__((reqd_work_group_size(64, 1, 1))) void k(__global float *a) {}";
        let image = compile(src, "", &fp64_device()).unwrap();
        assert_eq!(image.kernels[0].name, "k");
        assert_eq!(image.kernels[0].params.len(), 1);
    }

    #[test]
    fn conditional_directives_are_not_interpreted() {
        let src = "#if defined(USE_FP64)\n#endif\n__kernel void k(__global double *a) {}\n";
        let image = compile(src, "-D USE_FP64", &fp64_device()).unwrap();
        assert_eq!(image.kernels[0].name, "k");
    }

    #[test]
    fn missing_brace_reports_location() {
        let src = "__kernel void k(__global float *a)\n{\n    a[0] = 1.0f;\n";
        let log = compile(src, "", &fp64_device()).unwrap_err();
        assert!(log.contains("<source>:2:1: error: unmatched '{'"), "{log}");
        assert!(log.ends_with("1 error generated.\n"), "{log}");
    }

    #[test]
    fn error_directive_fails_the_build() {
        let log = compile("#error not ready\n", "", &fp64_device()).unwrap_err();
        assert!(log.contains("<source>:1:2: error: not ready"), "{log}");
    }

    #[test]
    fn double_requires_fp64() {
        let device = SimDeviceSpec::gpu("No FP64").without_fp64();
        let log = compile(ADD, "", &device).unwrap_err();
        assert!(log.contains("unsupported OpenCL extension 'cl_khr_fp64'"), "{log}");
        assert!(log.contains("use of type 'double' requires cl_khr_fp64 support"), "{log}");
    }

    #[test]
    fn comments_are_ignored() {
        let src = "/* __kernel void fake(int x) { */\n// __kernel void other() {\n__kernel void real() {}\n";
        let image = compile(src, "", &fp64_device()).unwrap();
        let names: Vec<_> = image.kernels.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["real"]);
    }

    #[test]
    fn unterminated_comment() {
        let log = compile("__kernel void k() {}\n/* open", "", &fp64_device()).unwrap_err();
        assert!(log.contains("<source>:2:1: error: unterminated /* comment"), "{log}");
    }

    #[test]
    fn build_options_are_checked() {
        assert!(compile("", "-cl-std=CL1.2 -D N=4 -DFOO -w", &fp64_device()).is_ok());
        let log = compile("", "-cl-std=CL9.9", &fp64_device()).unwrap_err();
        assert!(log.contains("invalid value 'CL9.9'"), "{log}");
        let log = compile("", "--bogus", &fp64_device()).unwrap_err();
        assert!(log.contains("unknown argument: '--bogus'"), "{log}");
    }

    #[test]
    fn declarations_and_helpers_are_not_kernels() {
        let src = "double helper(double x) { return x; }\n__kernel void k(__global double *a);\n";
        let image = compile(src, "", &fp64_device()).unwrap();
        assert!(image.kernels.is_empty());
    }
}
