use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1, take_while_m_n},
    character::complete::{anychar, char, digit1, newline, none_of, one_of, satisfy},
    combinator::{map, map_opt, map_res, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::model::*;


fn linespace1(i: &str) -> IResult<&str, &str> {
    take_while1(move |c: char| " \t".contains(c))(i)
}

fn remaining_text(i: &str) -> IResult<&str, &str> {
    take_while(move |c: char| c != '\n')(i)
}

/// End of a line, optionally preceded by a trailing comment.
fn eol(i: &str) -> IResult<&str, char> {
    preceded(
        pair(opt(linespace1), opt(preceded(char(';'), remaining_text))),
        newline,
    )(i)
}

fn digits<'a>(min: usize, max: usize) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    take_while_m_n(min, max, |c: char| c.is_ascii_digit())
}

fn date_string(i: &str) -> IResult<&str, NaiveDate> {
    map_opt(
        tuple((digits(4, 4), one_of("-/"), digits(1, 2), one_of("-/"), digits(1, 2))),
        |(year, _, month, _, day): (&str, char, &str, char, &str)| {
            NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
        },
    )(i)
}

fn number(i: &str) -> IResult<&str, BigDecimal> {
    map_res(
        recognize(tuple((
            opt(one_of("+-")),
            digit1,
            many0(pair(char(','), digit1)),
            opt(pair(char('.'), digit1)),
        ))),
        |text: &str| BigDecimal::from_str(&text.replace(',', "")),
    )(i)
}

fn currency(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_uppercase()),
        take_while(|c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || "'._-".contains(c)),
    ))(i)
}

fn amount(i: &str) -> IResult<&str, Amount> {
    map(
        separated_pair(number, linespace1, currency),
        |(number, currency)| Amount::new(number, currency),
    )(i)
}

fn account_segment(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '-')(i)
}

fn account(i: &str) -> IResult<&str, &str> {
    recognize(tuple((
        satisfy(|c| c.is_ascii_uppercase()),
        take_while(|c: char| c.is_alphanumeric() || c == '-'),
        preceded(char(':'), account_segment),
        many0(preceded(char(':'), account_segment)),
    )))(i)
}

fn string_literal(i: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            many0(alt((none_of("\\\""), preceded(char('\\'), anychar)))),
            char('"'),
        ),
        |chars| chars.into_iter().collect(),
    )(i)
}

fn tag_name(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || "-_/.".contains(c))(i)
}

fn hash_tag(i: &str) -> IResult<&str, &str> {
    preceded(char('#'), tag_name)(i)
}

fn meta_key(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_lowercase()),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
    ))(i)
}

fn meta_value(i: &str) -> IResult<&str, MetaValue> {
    alt((
        map(string_literal, MetaValue::String),
        map(date_string, MetaValue::Date),
        value(MetaValue::Bool(true), tag("TRUE")),
        value(MetaValue::Bool(false), tag("FALSE")),
        map(number, MetaValue::Number),
        map(take_while1(|c: char| !c.is_whitespace()), |s: &str| {
            MetaValue::Symbol(s.to_owned())
        }),
    ))(i)
}

fn meta_line(i: &str) -> IResult<&str, (String, MetaValue)> {
    map(
        delimited(
            linespace1,
            separated_pair(meta_key, pair(char(':'), opt(linespace1)), meta_value),
            eol,
        ),
        |(key, value)| (key.to_owned(), value),
    )(i)
}

fn meta_block(i: &str) -> IResult<&str, Meta> {
    map(many0(meta_line), |lines| lines.into_iter().collect())(i)
}

fn flag(i: &str) -> IResult<&str, char> {
    alt((value('*', tag("txn")), one_of("*!")))(i)
}

enum Marker<'a> {
    Tag(&'a str),
    Link(&'a str),
}

fn parse_posting(i: &str) -> IResult<&str, Posting> {
    map(
        tuple((
            terminated(
                tuple((
                    preceded(linespace1, opt(terminated(one_of("*!"), linespace1))),
                    account,
                    opt(preceded(linespace1, amount)),
                    opt(preceded(tuple((linespace1, char('@'), linespace1)), amount)),
                )),
                eol,
            ),
            meta_block,
        )),
        |((flag, account, units, price), meta)| Posting {
            flag,
            account: account.to_owned(),
            units,
            price,
            meta,
            interpolated: false,
        },
    )(i)
}

fn indented_comment(i: &str) -> IResult<&str, &str> {
    preceded(tuple((linespace1, char(';'))), terminated(remaining_text, newline))(i)
}

fn parse_transaction(i: &str) -> IResult<&str, Node> {
    map(
        tuple((
            terminated(
                tuple((
                    date_string,
                    preceded(linespace1, flag),
                    opt(preceded(linespace1, string_literal)),
                    opt(preceded(linespace1, string_literal)),
                    many0(preceded(
                        linespace1,
                        alt((
                            map(hash_tag, Marker::Tag),
                            map(preceded(char('^'), tag_name), Marker::Link),
                        )),
                    )),
                )),
                eol,
            ),
            meta_block,
            many0(alt((map(parse_posting, Some), value(None, indented_comment)))),
        )),
        |((date, flag, first, second, markers), meta, postings)| {
            let postings = postings.into_iter().flatten().collect();
            let (payee, narration) = match (first, second) {
                (Some(payee), Some(narration)) => (Some(payee), narration),
                (Some(narration), None) => (None, narration),
                _ => (None, String::new()),
            };
            let mut tx = Transaction {
                date,
                flag,
                payee,
                narration,
                meta,
                postings,
                ..Transaction::new(date, None, "")
            };
            for marker in markers {
                match marker {
                    Marker::Tag(tag) => tx.tags.insert(tag.to_owned()),
                    Marker::Link(link) => tx.links.insert(link.to_owned()),
                };
            }
            Node::Entry(Entry::Transaction(tx))
        },
    )(i)
}

fn dated<'a, O>(
    keyword: &'static str,
    body: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, (NaiveDate, O)> {
    pair(
        date_string,
        preceded(tuple((linespace1, tag(keyword), linespace1)), body),
    )
}

fn directive_kind(i: &str) -> IResult<&str, (NaiveDate, DirectiveKind)> {
    alt((
        map(
            dated(
                "open",
                pair(
                    account,
                    opt(preceded(linespace1, separated_list1(char(','), currency))),
                ),
            ),
            |(date, (account, currencies))| {
                (
                    date,
                    DirectiveKind::Open {
                        account: account.to_owned(),
                        currencies: currencies
                            .unwrap_or_default()
                            .into_iter()
                            .map(|c| c.to_owned())
                            .collect(),
                    },
                )
            },
        ),
        map(dated("close", account), |(date, account)| {
            (
                date,
                DirectiveKind::Close {
                    account: account.to_owned(),
                },
            )
        }),
        map(
            dated("balance", separated_pair(account, linespace1, amount)),
            |(date, (account, amount))| {
                (
                    date,
                    DirectiveKind::Balance {
                        account: account.to_owned(),
                        amount,
                    },
                )
            },
        ),
        map(
            dated("price", separated_pair(currency, linespace1, amount)),
            |(date, (currency, amount))| {
                (
                    date,
                    DirectiveKind::Price {
                        currency: currency.to_owned(),
                        amount,
                    },
                )
            },
        ),
        map(dated("commodity", currency), |(date, currency)| {
            (
                date,
                DirectiveKind::Commodity {
                    currency: currency.to_owned(),
                },
            )
        }),
        map(
            dated("note", separated_pair(account, linespace1, string_literal)),
            |(date, (account, comment))| {
                (
                    date,
                    DirectiveKind::Note {
                        account: account.to_owned(),
                        comment,
                    },
                )
            },
        ),
    ))(i)
}

fn parse_dated_directive(i: &str) -> IResult<&str, Node> {
    map(
        pair(terminated(directive_kind, eol), meta_block),
        |((date, kind), meta)| Node::Entry(Entry::Directive(Directive { date, meta, kind })),
    )(i)
}

fn parse_option(i: &str) -> IResult<&str, Node> {
    map(
        terminated(
            preceded(
                pair(tag("option"), linespace1),
                separated_pair(string_literal, linespace1, string_literal),
            ),
            eol,
        ),
        |(key, value)| Node::Option(key, value),
    )(i)
}

fn parse_plugin(i: &str) -> IResult<&str, Node> {
    map(
        terminated(
            preceded(
                pair(tag("plugin"), linespace1),
                pair(string_literal, opt(preceded(linespace1, string_literal))),
            ),
            eol,
        ),
        |(name, config)| Node::Plugin(name, config),
    )(i)
}

fn parse_include(i: &str) -> IResult<&str, Node> {
    map(
        terminated(preceded(pair(tag("include"), linespace1), string_literal), eol),
        Node::Include,
    )(i)
}

fn parse_pushtag(i: &str) -> IResult<&str, Node> {
    map(
        terminated(preceded(pair(tag("pushtag"), linespace1), hash_tag), eol),
        |tag| Node::PushTag(tag.to_owned()),
    )(i)
}

fn parse_poptag(i: &str) -> IResult<&str, Node> {
    map(
        terminated(preceded(pair(tag("poptag"), linespace1), hash_tag), eol),
        |tag| Node::PopTag(tag.to_owned()),
    )(i)
}

fn parse_comment(i: &str) -> IResult<&str, Node> {
    map(
        preceded(
            pair(opt(linespace1), char(';')),
            terminated(remaining_text, newline),
        ),
        |text| Node::Comment(text.into()),
    )(i)
}

/// Org-mode section lines, as written by extraction before each statement.
fn parse_org_heading(i: &str) -> IResult<&str, Node> {
    map(
        terminated(recognize(pair(char('*'), remaining_text)), newline),
        |text: &str| Node::Heading(text.into()),
    )(i)
}

fn parse_empty_line(i: &str) -> IResult<&str, Node> {
    map(preceded(opt(linespace1), newline), |_| Node::EmptyLine)(i)
}

fn parse_node(i: &str) -> IResult<&str, Node> {
    alt((
        parse_empty_line,
        parse_comment,
        parse_org_heading,
        parse_transaction,
        parse_dated_directive,
        parse_option,
        parse_plugin,
        parse_include,
        parse_pushtag,
        parse_poptag,
    ))(i)
}

pub fn parse_str(i: &str) -> Result<Vec<Node>, LedgerError> {
    let owned;
    let input = if i.is_empty() || i.ends_with('\n') {
        i
    } else {
        owned = format!("{}\n", i);
        &owned
    };

    let unparsed = |remaining: &str| LedgerError::Parse {
        line: input[..input.len() - remaining.len()].matches('\n').count() + 1,
        text: remaining.lines().next().unwrap_or_default().to_owned(),
    };

    let parsed = many0(parse_node)(input);
    match parsed {
        Ok(("", nodes)) => Ok(nodes),
        Ok((remaining, _)) => Err(unparsed(remaining)),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(unparsed(e.input)),
        Err(nom::Err::Incomplete(_)) => Err(unparsed("")),
    }
}
