//! Positional command parsing and dispatch.

use crate::pretty;
use common::{DbError, DbResult};
use executor::Engine;
use types::CompareOp;

/// Parse and run one command line, returning the text to show the user.
pub fn dispatch(engine: &mut Engine, line: &str) -> DbResult<String> {
    let tokens = tokenize(line);
    let Some((command, args)) = tokens.split_first() else {
        return Ok(String::new());
    };
    let command = command.as_str();

    match command {
        "createdb" => {
            let [path] = exact::<1>(command, args)?;
            engine.create_db(&path)?;
            Ok(format!("database {path} created"))
        }
        "destroydb" => {
            let [path] = exact::<1>(command, args)?;
            engine.destroy_db(&path)?;
            Ok(format!("database {path} destroyed"))
        }
        "opendb" => {
            let [path] = exact::<1>(command, args)?;
            engine.open_db(&path)?;
            Ok(format!("database {path} opened"))
        }
        "closedb" => {
            exact::<0>(command, args)?;
            engine.close_db()?;
            Ok("database closed".to_string())
        }
        "create" => {
            let (rel, pairs) = rel_and_pairs(command, args)?;
            engine.create(&rel, &pairs)?;
            Ok(format!(
                "relation {rel} created with {} attributes",
                pairs.len()
            ))
        }
        "destroy" => {
            let [rel] = exact::<1>(command, args)?;
            engine.destroy(&rel)?;
            Ok(format!("relation {rel} destroyed"))
        }
        "load" => {
            let [rel, file] = exact::<2>(command, args)?;
            engine.load(&rel, &file)?;
            Ok(format!("loaded {file} into {rel}"))
        }
        "insert" => {
            let (rel, pairs) = rel_and_pairs(command, args)?;
            engine.insert(&rel, &pairs)?;
            Ok(format!("inserted record into {rel}"))
        }
        "delete" => {
            let [rel, attr, op, value] = exact::<4>(command, args)?;
            let op = parse_op(&op)?;
            let count = engine.delete(&rel, &attr, op, &value)?;
            Ok(format!("{count} records successfully deleted from {rel}"))
        }
        "select" => {
            let [dst, src, attr, op, value] = exact::<5>(command, args)?;
            let op = parse_op(&op)?;
            engine.select(&dst, &src, &attr, op, &value)?;
            Ok(format!("selected {src} into {dst}"))
        }
        "project" => {
            if args.len() < 3 {
                return Err(DbError::MissingArgs(command.to_string()));
            }
            let dst = args[0].clone();
            let src = args[1].clone();
            engine.project(&dst, &src, &args[2..])?;
            Ok(format!("projected {src} into {dst}"))
        }
        "join" => {
            let [dst, src1, attr1, src2, attr2] = exact::<5>(command, args)?;
            engine.join(&dst, &src1, &attr1, &src2, &attr2)?;
            Ok(format!("joined {src1} and {src2} into {dst}"))
        }
        "buildindex" => {
            let [rel, attr] = exact::<2>(command, args)?;
            engine.build_index(&rel, &attr)?;
            Ok(format!("built index on {rel}.{attr}"))
        }
        "dropindex" => match args {
            [rel] => {
                engine.drop_index(rel, None)?;
                Ok(format!("dropped all indexes of {rel}"))
            }
            [rel, attr] => {
                engine.drop_index(rel, Some(attr.as_str()))?;
                Ok(format!("dropped index on {rel}.{attr}"))
            }
            [] => Err(DbError::MissingArgs(command.to_string())),
            _ => Err(DbError::ExtraArgs(command.to_string())),
        },
        "print" => {
            let [rel] = exact::<1>(command, args)?;
            let rows = engine.scan_rows(&rel)?;
            Ok(pretty::render_rows(&rows))
        }
        "help" => Ok(HELP.to_string()),
        _ => Err(DbError::UnknownCommand(command.to_string())),
    }
}

const HELP: &str = "\
createdb <path>            destroydb <path>
opendb <path>              closedb
create <rel> (<attr> <fmt>)...   formats: i, f, sN
destroy <rel>              load <rel> <file>
insert <rel> (<attr> <val>)...
delete <rel> <attr> <op> <val>
select <dst> <src> <attr> <op> <val>
project <dst> <src> <attr>...
join <dst> <src1> <attr1> <src2> <attr2>
buildindex <rel> <attr>    dropindex <rel> [<attr>]
print <rel>                quit";

/// Split a command line on whitespace, honouring double quotes so
/// string literals can contain spaces.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn exact<const N: usize>(command: &str, args: &[String]) -> DbResult<[String; N]> {
    if args.len() < N {
        return Err(DbError::MissingArgs(command.to_string()));
    }
    if args.len() > N {
        return Err(DbError::ExtraArgs(command.to_string()));
    }
    Ok(std::array::from_fn(|i| args[i].clone()))
}

/// `<rel>` followed by one or more `<name> <value>` pairs.
fn rel_and_pairs(command: &str, args: &[String]) -> DbResult<(String, Vec<(String, String)>)> {
    if args.len() < 3 {
        return Err(DbError::MissingArgs(command.to_string()));
    }
    let rel = args[0].clone();
    let rest = &args[1..];
    if rest.len() % 2 != 0 {
        return Err(DbError::MissingArgs(command.to_string()));
    }
    let pairs = rest
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    Ok((rel, pairs))
}

/// Accept either the operator symbol or its integer encoding.
fn parse_op(token: &str) -> DbResult<CompareOp> {
    CompareOp::from_symbol(token)
        .or_else(|| token.parse::<i32>().ok().and_then(CompareOp::from_code))
        .ok_or_else(|| DbError::UnknownOperator(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_honours_quotes() {
        assert_eq!(
            tokenize(r#"insert r name "Charlie Brown" id 1"#),
            vec!["insert", "r", "name", "Charlie Brown", "id", "1"]
        );
        assert_eq!(tokenize("  print   r  "), vec!["print", "r"]);
        assert_eq!(tokenize(""), Vec::<String>::new());
    }

    #[test]
    fn operators_parse_as_symbols_or_codes() {
        assert_eq!(parse_op(">=").unwrap(), CompareOp::Ge);
        assert_eq!(parse_op("501").unwrap(), CompareOp::Eq);
        assert_eq!(parse_op("!=").unwrap(), CompareOp::Ne);
        assert!(parse_op("~").is_err());
    }

    #[test]
    fn pair_lists_must_balance() {
        let args: Vec<String> = ["r", "a", "i", "b"].iter().map(|s| s.to_string()).collect();
        assert!(rel_and_pairs("create", &args).is_err());
        let args: Vec<String> = ["r", "a", "i"].iter().map(|s| s.to_string()).collect();
        let (rel, pairs) = rel_and_pairs("create", &args).unwrap();
        assert_eq!(rel, "r");
        assert_eq!(pairs, vec![("a".to_string(), "i".to_string())]);
    }
}
