use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

use bevy::{
    ecs::system::{RegisteredSystemError, SystemId},
    platform::collections::{Equivalent, HashMap},
    prelude::*,
};
use smallvec::SmallVec;

use crate::{error::ActivityError, payload::Payload};

/// 条件上下文
///
/// Condition context
/// # 作用\Purpose
/// * `activity`: 正在检测的活动组件
/// - `activity`: the activity component being tested
/// * `context`: 表达式的上下文实体, 默认为活动组件本身
/// - `context`: the expression's context entity, the activity component itself by default
/// * `param`: 表达式的参数
/// - `param`: the expression's parameter
#[derive(Debug, Clone)]
pub struct ConditionContext {
    pub activity: Entity,
    pub context: Entity,
    pub param: Payload,
}

/// 条件的系统ID
///
/// Condition system ID
pub type ConditionId = SystemId<In<ConditionContext>, bool>;

/// 注册可以在条件表达式中按名称引用的条件
///
/// Register conditions that condition expressions refer to by name
/// ```
/// # use bevy::prelude::*;
/// # use bevy_activity::prelude::*;
/// # fn door_open(context: In<ConditionContext>) -> bool {
/// #     true
/// # }
/// # fn foo(mut commands: Commands, mut conditions: ResMut<ActivityConditions>) {
/// let system_id = commands.register_system(door_open);
/// conditions.insert("door_open", system_id);
/// # }
/// ```
#[derive(Resource, Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivityConditions(HashMap<String, ConditionId>);

impl ActivityConditions {
    /// 将条件表达式中的名称解析为系统ID
    ///
    /// Resolve the names of a condition expression into system IDs
    pub fn resolve(
        &self,
        condition: &CombinationCondition,
    ) -> Result<CombinationConditionId, ActivityError> {
        Ok(match condition {
            CombinationCondition::And(conditions) => {
                let mut condition_ids = SmallVec::new();
                for condition in conditions {
                    condition_ids.push(Box::new(self.resolve(condition)?));
                }
                CombinationConditionId::And(condition_ids)
            }
            CombinationCondition::Or(conditions) => {
                let mut condition_ids = SmallVec::new();
                for condition in conditions {
                    condition_ids.push(Box::new(self.resolve(condition)?));
                }
                CombinationConditionId::Or(condition_ids)
            }
            CombinationCondition::Not(condition) => {
                CombinationConditionId::Not(Box::new(self.resolve(condition)?))
            }
            CombinationCondition::Id(name) => CombinationConditionId::Id(
                self.get(name)
                    .ok_or_else(|| ActivityError::UnknownCondition(name.clone()))?,
            ),
        })
    }

    /// 获取一个条件
    ///
    /// Get a condition
    pub fn get<Q>(&self, name: &Q) -> Option<ConditionId>
    where
        Q: Hash + Equivalent<String> + ?Sized,
    {
        self.0.get(name).copied()
    }

    /// 插入一个条件
    ///
    /// Insert a condition
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        condition_id: ConditionId,
    ) -> Option<ConditionId> {
        self.0.insert(name.into(), condition_id)
    }

    /// 移除一个条件
    ///
    /// Remove a condition
    pub fn remove<Q>(&mut self, name: &Q) -> Option<ConditionId>
    where
        Q: Hash + Equivalent<String> + ?Sized,
    {
        self.0.remove(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 已解析的组合条件
///
/// Resolved combination condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombinationConditionId {
    And(SmallVec<[Box<CombinationConditionId>; 2]>),
    Or(SmallVec<[Box<CombinationConditionId>; 2]>),
    Not(Box<CombinationConditionId>),
    Id(ConditionId),
}

impl CombinationConditionId {
    /// 短路求值
    ///
    /// Short-circuit evaluation
    pub fn run(
        &self,
        world: &mut World,
        input: &ConditionContext,
    ) -> Result<bool, RegisteredSystemError<In<ConditionContext>, bool>> {
        match self {
            CombinationConditionId::And(ids) => {
                for id in ids {
                    if !id.run(world, input)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CombinationConditionId::Or(ids) => {
                for id in ids {
                    if id.run(world, input)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            CombinationConditionId::Not(not) => Ok(!not.run(world, input)?),
            CombinationConditionId::Id(system_id) => {
                world.run_system_with(*system_id, input.clone())
            }
        }
    }
}

/// 组合条件
///
/// Combination condition
///
/// 用于组合多个命名条件，支持AND、OR、NOT操作。
///
/// Use to combine multiple named conditions, support AND, OR, NOT operations.
/// # 示例\Example
///
/// ```rust
/// use bevy_activity::prelude::*;
///
/// # fn main(){
/// let parsed = CombinationCondition::parse("And(door_open, Not(locked))").unwrap();
/// let built = CombinationCondition::new("door_open")
///     .add_and(CombinationCondition::new("locked").add_not());
///
/// assert_eq!(parsed, built);
/// # }
/// ```
#[derive(Clone, PartialEq, Eq)]
pub enum CombinationCondition {
    And(SmallVec<[Box<CombinationCondition>; 2]>),
    Or(SmallVec<[Box<CombinationCondition>; 2]>),
    Not(Box<CombinationCondition>),
    Id(String),
}

impl CombinationCondition {
    pub fn new(name: impl Into<String>) -> Self {
        Self::Id(name.into())
    }

    pub fn add_and(self, condition: CombinationCondition) -> Self {
        match (self, condition) {
            (Self::And(l), Self::And(r)) => Self::And(l.into_iter().chain(r).collect()),
            (Self::And(mut l), r) => {
                l.push(Box::new(r));
                Self::And(l)
            }
            (l, r) => Self::And(SmallVec::from_buf([Box::new(l), Box::new(r)])),
        }
    }

    pub fn add_or(self, condition: CombinationCondition) -> Self {
        match (self, condition) {
            (Self::Or(l), Self::Or(r)) => Self::Or(l.into_iter().chain(r).collect()),
            (Self::Or(mut l), r) => {
                l.push(Box::new(r));
                Self::Or(l)
            }
            (l, r) => Self::Or(SmallVec::from_buf([Box::new(l), Box::new(r)])),
        }
    }

    /// 取反, 双重否定会被消去
    ///
    /// Negate, a double negation cancels out
    pub fn add_not(self) -> Self {
        match self {
            Self::Not(condition) => *condition,
            _ => Self::Not(Box::new(self)),
        }
    }

    /// 从表达式解析
    ///
    /// Parse from an expression
    /// # 语法\Grammar
    /// ```text
    /// condition := name | `Not(` condition `)` | (`And` | `Or`) `(` condition (`,` condition)+ `)`
    /// name      := (letter | `_`) (letter | digit | `_`)*
    /// ```
    pub fn parse(s: impl AsRef<str>) -> Result<Self, ActivityError> {
        let source = s.as_ref();
        let tokens = tokenize(source)?;
        let mut cursor = Cursor {
            tokens: &tokens,
            at: 0,
            depth: 0,
        };
        let condition = cursor.condition()?;
        if cursor.at != tokens.len() {
            return Err(invalid(format!("unexpected trailing input in `{}`", source.trim())));
        }
        Ok(condition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Open,
    Close,
    Comma,
}

fn invalid(message: String) -> ActivityError {
    ActivityError::InvalidExpression(message)
}

fn tokenize(source: &str) -> Result<Vec<Token>, ActivityError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            c if c.is_whitespace() => {}
            c if c.is_alphabetic() || c == '_' => {
                let mut end = at + c.len_utf8();
                while let Some(&(next_at, next)) = chars.peek()
                    && (next.is_alphanumeric() || next == '_')
                {
                    end = next_at + next.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Name(source[at..end].to_string()));
            }
            c => return Err(invalid(format!("illegal character '{}' at {}", c, at))),
        }
    }
    Ok(tokens)
}

/// 最大嵌套层数
const MAX_DEPTH: usize = 64;

struct Cursor<'a> {
    tokens: &'a [Token],
    at: usize,
    depth: usize,
}

impl Cursor<'_> {
    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.at)?;
        self.at += 1;
        Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        let matched = self.tokens.get(self.at) == Some(token);
        if matched {
            self.at += 1;
        }
        matched
    }

    fn condition(&mut self) -> Result<CombinationCondition, ActivityError> {
        let Some(Token::Name(name)) = self.bump().cloned() else {
            return Err(invalid("expect 'Not', 'And', 'Or' or a condition name".to_string()));
        };
        if !self.eat(&Token::Open) {
            return Ok(CombinationCondition::Id(name));
        }
        if self.depth >= MAX_DEPTH {
            return Err(invalid(format!("nested deeper than {} levels", MAX_DEPTH)));
        }
        self.depth += 1;
        let operands = self.operands(&name);
        self.depth -= 1;
        combine(name, operands?)
    }

    fn operands(&mut self, name: &str) -> Result<SmallVec<[Box<CombinationCondition>; 2]>, ActivityError> {
        let mut operands = SmallVec::new();
        loop {
            operands.push(Box::new(self.condition()?));
            if self.eat(&Token::Close) {
                return Ok(operands);
            }
            if !self.eat(&Token::Comma) {
                return Err(invalid(format!("expect ',' or ')' in '{}'", name)));
            }
        }
    }
}

fn combine(
    name: String,
    mut operands: SmallVec<[Box<CombinationCondition>; 2]>,
) -> Result<CombinationCondition, ActivityError> {
    match (name.as_str(), operands.len()) {
        ("Not", 1) => Ok(CombinationCondition::Not(operands.remove(0))),
        ("Not", n) => Err(invalid(format!("'Not' takes 1 condition, got {}", n))),
        ("And", 2..) => Ok(CombinationCondition::And(operands)),
        ("Or", 2..) => Ok(CombinationCondition::Or(operands)),
        ("And" | "Or", _) => Err(invalid(format!("expect at least 2 conditions in '{}'", name))),
        _ => Err(invalid(format!(
            "invalid operator '{}', only 'And', 'Or', 'Not' are allowed",
            name
        ))),
    }
}

impl Display for CombinationCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(
            f: &mut std::fmt::Formatter<'_>,
            operator: &str,
            conditions: &[Box<CombinationCondition>],
        ) -> std::fmt::Result {
            write!(f, "{}(", operator)?;
            for (i, condition) in conditions.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", condition)?;
            }
            write!(f, ")")
        }
        match self {
            CombinationCondition::And(ands) => join(f, "And", ands),
            CombinationCondition::Or(ors) => join(f, "Or", ors),
            CombinationCondition::Not(not) => write!(f, "Not({})", not),
            CombinationCondition::Id(id) => write!(f, "{}", id),
        }
    }
}

impl Debug for CombinationCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl From<&str> for CombinationCondition {
    fn from(value: &str) -> Self {
        CombinationCondition::Id(value.into())
    }
}
