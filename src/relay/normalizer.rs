//! 文本规范化 - 去掉重音、货币符号和排版标点
//!
//! 收集端按 ASCII 关键词解析金额和付款人，所以转发前需要：
//! - 折叠西语常见重音字母（保留大小写）
//! - 删除 `¿ ¡ ? ! $ € £ ¥` 等符号
//! - 排版引号、破折号、省略号换成 ASCII 等价物
//! - 去掉首尾空白
//!
//! 规范化是幂等的：所有替换结果都只含 ASCII，且不会再次命中替换表。

/// 单个字符的替换结果
enum Replacement {
    Keep,
    Drop,
    Char(char),
    Str(&'static str),
}

fn replacement(c: char) -> Replacement {
    use Replacement::*;

    match c {
        'á' => Char('a'),
        'é' => Char('e'),
        'í' => Char('i'),
        'ó' => Char('o'),
        'ú' => Char('u'),
        'ñ' => Char('n'),
        'ü' => Char('u'),
        'ç' => Char('c'),
        'Á' => Char('A'),
        'É' => Char('E'),
        'Í' => Char('I'),
        'Ó' => Char('O'),
        'Ú' => Char('U'),
        'Ñ' => Char('N'),
        'Ü' => Char('U'),
        'Ç' => Char('C'),

        '¿' | '¡' | '?' | '!' | '$' | '€' | '£' | '¥' => Drop,
        '°' | 'º' | 'ª' | '§' | '¶' | '†' | '‡' | '•' => Drop,
        // 这几个会展开成 `!` / `?`，直接删除才能保持幂等
        '‼' | '⁇' | '⁈' | '⁉' => Drop,

        '…' => Str("..."),
        '–' | '—' => Char('-'),
        '\u{201C}' | '\u{201D}' | '«' | '»' | '„' | '″' | '‶' => Char('"'),
        '\u{2018}' | '\u{2019}' | '‚' | '′' | '‴' | '‷' => Char('\''),
        '‹' | '‸' => Char('<'),
        '›' => Char('>'),
        '‰' | '‱' => Char('%'),
        '‵' => Char('`'),
        '※' | '⁕' => Char('*'),
        '⁏' => Char(';'),
        '⁐' => Char(':'),
        '⁓' => Char('~'),
        '⁔' => Char('+'),
        '⁑' | '⁖' | '⁚' => Str("**"),
        '⁒' | '⁗' | '⁛' => Str("***"),
        '⁘' | '⁜' => Str("****"),
        '⁙' | '⁝' => Str("*****"),
        '⁞' => Str("******"),

        _ => Keep,
    }
}

/// 规范化通知文本
///
/// 空白输入原样返回。
pub fn normalize(text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match replacement(c) {
            Replacement::Keep => out.push(c),
            Replacement::Drop => {}
            Replacement::Char(r) => out.push(r),
            Replacement::Str(s) => out.push_str(s),
        }
    }

    out.trim().to_string()
}
