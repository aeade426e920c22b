//! Interpreter for assembled simulation kernels
//!
//! Only the statement forms that the kernel source assembler emits are
//! understood, anything else is rejected at compile time. Index arithmetic is
//! evaluated with the wrapping 32-bit semantics of GLSL `uint`, and the stencil
//! is read from the kernel text: which input elements are summed, and with
//! which weight the central cell is subtracted. The reaction formula must be
//! the Gray-Scott one, which is then evaluated on the host.

use super::HostError;
use compute::stencil;
use compute_gpu_kernel::source::GRAY_SCOTT_FORMULA;
use data::{parameters::Parameters, Precision, NUM_SPECIES};

/// Variables that are defined before the first kernel statement runs
const BUILTINS: [&str; 6] = [
    "global_size.x",
    "global_size.y",
    "global_size.z",
    "gl_GlobalInvocationID.x",
    "gl_GlobalInvocationID.y",
    "gl_GlobalInvocationID.z",
];

/// Kernel program, as understood by the interpreter
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    /// Work-group shape from the `layout(local_size_...)` declaration
    block_shape: [u32; 3],

    /// Baked model constants
    params: Parameters,
    denormal_guard: Precision,

    /// `uint` declarations, in execution order
    declarations: Vec<Expr>,

    /// Element that `uv` is loaded from
    center: Expr,

    /// Elements that are summed into the Laplacian
    neighbors: Vec<Expr>,

    /// Weight of `uv` in the Laplacian
    center_weight: Precision,

    /// Element that the result is stored into
    output: Expr,
}
//
impl Kernel {
    /// Parse a kernel
    pub fn parse(source: &str) -> Result<Self, HostError> {
        let lines = source.lines().map(str::trim).collect::<Vec<_>>();
        let block_shape = lines
            .iter()
            .find_map(|line| parse_local_size(line))
            .ok_or(HostError::MissingStatement("work-group size"))?;
        let constant = |name: &'static str| {
            let prefix = format!("const float {name} = ");
            lines
                .iter()
                .find_map(|line| line.strip_prefix(&prefix)?.strip_suffix(';'))
                .and_then(|value| value.parse::<Precision>().ok())
                .ok_or(HostError::MissingConstant(name))
        };
        let params = Parameters {
            diffusion_rate_u: constant("diffusion_rate_u")?,
            diffusion_rate_v: constant("diffusion_rate_v")?,
            feed_rate: constant("feed_rate")?,
            kill_rate: constant("kill_rate")?,
            time_step: constant("time_step")?,
        };
        let denormal_guard = constant("denormal_guard")?;

        // Statements of main(), without comments or line breaks
        let body = source
            .split_once("void main() {")
            .and_then(|(_, body)| body.trim_end().strip_suffix('}'))
            .ok_or(HostError::MissingStatement("main()"))?
            .lines()
            .map(|line| line.split_once("//").map_or(line, |(code, _)| code))
            .collect::<Vec<_>>()
            .join(" ");
        let statements = body
            .split(';')
            .map(normalize)
            .filter(|statement| !statement.is_empty());

        let mut variables = BUILTINS.map(String::from).to_vec();
        let mut declarations = Vec::new();
        let mut center = None;
        let mut laplacian = None;
        let mut output = None;
        let mut formula = Vec::new();
        let mut seen = Vec::new();
        for statement in statements {
            let unsupported = || HostError::UnsupportedStatement(statement.clone());
            if let Some(declaration) = statement.strip_prefix("uint ") {
                let (name, value) = declaration.split_once(" = ").ok_or_else(unsupported)?;
                declarations.push(Expr::parse(value, &variables)?);
                variables.push(name.to_owned());
            } else if let Some(index) = statement
                .strip_prefix("vec2 uv = input_uv[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                center = Some(Expr::parse(index, &variables)?);
            } else if let Some(sum) = statement.strip_prefix("vec2 laplacian_uv = ") {
                laplacian = Some(parse_stencil(sum, &variables).ok_or_else(unsupported)??);
            } else if let Some((index, value)) = statement
                .strip_prefix("output_uv[")
                .and_then(|rest| rest.split_once("] = "))
            {
                if value != "uv + time_step * vec2(delta_u, delta_v)" {
                    return Err(unsupported());
                }
                output = Some(Expr::parse(index, &variables)?);
            } else if statement.starts_with("delta_u = ") || statement.starts_with("delta_v = ") {
                formula.push(statement);
            } else if [
                "uvec3 global_size = gl_NumWorkGroups * gl_WorkGroupSize",
                "float u = uv.x",
                "float v = uv.y",
                "float laplacian_u = laplacian_uv.x + denormal_guard",
                "float laplacian_v = laplacian_uv.y + denormal_guard",
                "float delta_u",
                "float delta_v",
            ]
            .contains(&statement.as_str())
            {
                seen.push(statement);
            } else {
                return Err(unsupported());
            }
        }
        for required in [
            "uvec3 global_size = gl_NumWorkGroups * gl_WorkGroupSize",
            "float u = uv.x",
            "float v = uv.y",
            "float laplacian_u = laplacian_uv.x + denormal_guard",
            "float laplacian_v = laplacian_uv.y + denormal_guard",
        ] {
            if !seen.iter().any(|statement| statement == required) {
                return Err(HostError::MissingStatement(required));
            }
        }

        let gray_scott = GRAY_SCOTT_FORMULA
            .split(';')
            .map(normalize)
            .filter(|statement| !statement.is_empty())
            .collect::<Vec<_>>();
        if formula != gray_scott {
            return Err(HostError::UnsupportedFormula);
        }

        let (neighbors, center_weight) =
            laplacian.ok_or(HostError::MissingStatement("laplacian"))?;
        Ok(Self {
            block_shape,
            params,
            denormal_guard,
            declarations,
            center: center.ok_or(HostError::MissingStatement("uv"))?,
            neighbors,
            center_weight,
            output: output.ok_or(HostError::MissingStatement("output"))?,
        })
    }

    /// Work-group shape that the kernel was compiled for
    pub fn block_shape(&self) -> [u32; 3] {
        self.block_shape
    }

    /// Run every work item of a `global_shape` dispatch
    pub fn run(
        &self,
        input: &[Precision],
        output: &mut [Precision],
        global_shape: [u32; 3],
    ) -> Result<(), HostError> {
        let [width, height, depth] = global_shape;
        let mut variables = vec![0; BUILTINS.len() + self.declarations.len()];
        variables[..3].copy_from_slice(&global_shape);
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    variables[3..6].copy_from_slice(&[x, y, z]);
                    for (idx, declaration) in self.declarations.iter().enumerate() {
                        variables[BUILTINS.len() + idx] = declaration.eval(&variables);
                    }
                    let load = |index: &Expr| -> Result<[Precision; 2], HostError> {
                        let start = index.eval(&variables) as usize * NUM_SPECIES;
                        input
                            .get(start..start + NUM_SPECIES)
                            .map(|uv| [uv[0], uv[1]])
                            .ok_or(HostError::OutOfBounds(start / NUM_SPECIES))
                    };

                    let uv = load(&self.center)?;
                    let mut sum = [0.0; 2];
                    for neighbor in &self.neighbors {
                        let neighbor = load(neighbor)?;
                        sum = [sum[0] + neighbor[0], sum[1] + neighbor[1]];
                    }
                    let laplacian = [0, 1].map(|component| {
                        sum[component] - self.center_weight * uv[component] + self.denormal_guard
                    });

                    let start = self.output.eval(&variables) as usize * NUM_SPECIES;
                    output
                        .get_mut(start..start + NUM_SPECIES)
                        .ok_or(HostError::OutOfBounds(start / NUM_SPECIES))?
                        .copy_from_slice(&stencil::react(&self.params, uv, laplacian));
                }
            }
        }
        Ok(())
    }
}

/// Collapse whitespace runs into single spaces
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a `layout(local_size_x = X, local_size_y = Y, local_size_z = Z) in;`
/// declaration
fn parse_local_size(line: &str) -> Option<[u32; 3]> {
    let sizes = line
        .strip_prefix("layout(")?
        .strip_suffix(") in;")?
        .split(", ")
        .collect::<Vec<_>>();
    let &[x, y, z] = sizes.as_slice() else {
        return None;
    };
    let size = |assignment: &str, name: &str| {
        assignment
            .strip_prefix(name)?
            .strip_prefix(" = ")?
            .parse::<u32>()
            .ok()
    };
    Some([
        size(x, "local_size_x")?,
        size(y, "local_size_y")?,
        size(z, "local_size_z")?,
    ])
}

/// Parse the right-hand side of the Laplacian definition, which must be a sum
/// of `input_uv[...]` elements minus a multiple of `uv`
///
/// Returns `None` if the expression has some other shape.
fn parse_stencil(
    sum: &str,
    variables: &[String],
) -> Option<Result<(Vec<Expr>, Precision), HostError>> {
    let mut neighbors = Vec::new();
    let mut center_weight = None;
    for (sign, term) in signed_terms(sum) {
        if let Some(index) = term
            .strip_prefix("input_uv[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            if sign != '+' {
                return None;
            }
            neighbors.push(Expr::parse(index, variables));
        } else if let Some(weight) = term.strip_suffix(" * uv") {
            if sign != '-' || center_weight.is_some() {
                return None;
            }
            center_weight = Some(weight.parse::<Precision>().ok()?);
        } else {
            return None;
        }
    }
    let center_weight = center_weight?;
    Some(
        neighbors
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map(|neighbors| (neighbors, center_weight)),
    )
}

/// Split an expression at its top-level additions and subtractions
fn signed_terms(expr: &str) -> Vec<(char, &str)> {
    let mut terms = Vec::new();
    let mut depth = 0;
    let mut sign = '+';
    let mut start = 0;
    for (idx, c) in expr.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            '+' | '-' if depth == 0 => {
                terms.push((sign, expr[start..idx].trim()));
                sign = c;
                start = idx + 1;
            }
            _ => {}
        }
    }
    terms.push((sign, expr[start..].trim()));
    terms
}

/// `uint` expression
#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Literal(u32),
    Variable(usize),
    Binary(Box<Expr>, Operator, Box<Expr>),
}
//
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Operator {
    Add,
    Sub,
    Mul,
    And,
}
//
impl Expr {
    /// Parse an expression, resolving names into positions within `variables`
    fn parse(text: &str, variables: &[String]) -> Result<Self, HostError> {
        let invalid = || HostError::InvalidExpression(text.to_owned());
        let tokens = tokenize(text).ok_or_else(invalid)?;
        let mut parser = ExprParser {
            tokens: &tokens,
            variables,
        };
        let expr = parser.bit_and().ok_or_else(invalid)?;
        if parser.tokens.is_empty() {
            Ok(expr)
        } else {
            Err(invalid())
        }
    }

    /// Evaluate an expression with GLSL `uint` semantics
    fn eval(&self, variables: &[u32]) -> u32 {
        match self {
            Self::Literal(value) => *value,
            Self::Variable(idx) => variables[*idx],
            Self::Binary(lhs, op, rhs) => {
                let (lhs, rhs) = (lhs.eval(variables), rhs.eval(variables));
                match op {
                    Operator::Add => lhs.wrapping_add(rhs),
                    Operator::Sub => lhs.wrapping_sub(rhs),
                    Operator::Mul => lhs.wrapping_mul(rhs),
                    Operator::And => lhs & rhs,
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(u32),
    Name(String),
    Symbol(char),
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() {
            let mut value = 0u32;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                value = value.checked_mul(10)?.checked_add(digit)?;
                chars.next();
            }
            chars.next_if_eq(&'u');
            tokens.push(Token::Number(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut name = String::new();
            while let Some(c) = chars.next_if(|&c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            {
                name.push(c);
            }
            tokens.push(Token::Name(name));
        } else if "+-*&()".contains(c) {
            tokens.push(Token::Symbol(c));
            chars.next();
        } else {
            return None;
        }
    }
    Some(tokens)
}

/// Recursive descent parser with GLSL operator precedence
struct ExprParser<'tokens> {
    tokens: &'tokens [Token],
    variables: &'tokens [String],
}
//
impl ExprParser<'_> {
    fn next_symbol_in(&mut self, symbols: &str) -> Option<char> {
        match self.tokens.first() {
            Some(&Token::Symbol(c)) if symbols.contains(c) => {
                self.tokens = &self.tokens[1..];
                Some(c)
            }
            _ => None,
        }
    }

    fn bit_and(&mut self) -> Option<Expr> {
        let mut expr = self.additive()?;
        while self.next_symbol_in("&").is_some() {
            expr = Expr::Binary(Box::new(expr), Operator::And, Box::new(self.additive()?));
        }
        Some(expr)
    }

    fn additive(&mut self) -> Option<Expr> {
        let mut expr = self.multiplicative()?;
        while let Some(c) = self.next_symbol_in("+-") {
            let op = if c == '+' { Operator::Add } else { Operator::Sub };
            expr = Expr::Binary(Box::new(expr), op, Box::new(self.multiplicative()?));
        }
        Some(expr)
    }

    fn multiplicative(&mut self) -> Option<Expr> {
        let mut expr = self.primary()?;
        while self.next_symbol_in("*").is_some() {
            expr = Expr::Binary(Box::new(expr), Operator::Mul, Box::new(self.primary()?));
        }
        Some(expr)
    }

    fn primary(&mut self) -> Option<Expr> {
        if self.next_symbol_in("(").is_some() {
            let expr = self.bit_and()?;
            self.next_symbol_in(")")?;
            return Some(expr);
        }
        let (token, rest) = self.tokens.split_first()?;
        let expr = match token {
            Token::Number(value) => Expr::Literal(*value),
            Token::Name(name) => Expr::Variable(self.variables.iter().rposition(|v| v == name)?),
            Token::Symbol(_) => return None,
        };
        self.tokens = rest;
        Some(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_arithmetic_wraps() {
        let variables = ["x", "X"].map(String::from);
        let expr = Expr::parse("(x + X - 1u) & (X - 1u)", &variables).unwrap();
        assert_eq!(expr.eval(&[0, 8]), 7);
        assert_eq!(expr.eval(&[5, 8]), 4);
        let expr = Expr::parse("X * (x + 1u) + x", &variables).unwrap();
        assert_eq!(expr.eval(&[2, 8]), 26);
        assert!(Expr::parse("x + y", &variables).is_err());
        assert!(Expr::parse("x +", &variables).is_err());
    }
}
