//! Destination table layouts
//!
//! Every record type is described once, as an ordered list of columns. The
//! reader, the transformer, the loader and the provisioner all work from
//! these tables, so column order here is also the positional order of the
//! source files.

use crate::classify::RecordKind;

/// Coercion applied to a source field and the SQL type it lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int,
    /// Comma-decimal amount, stored as `NUMERIC(15,2)`
    Decimal,
    /// `YYYYMMDD`, with zero/blank sentinels for null
    Date,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::Int => "INTEGER",
            ColumnKind::Decimal => "NUMERIC(15,2)",
            ColumnKind::Date => "DATE",
        }
    }

    /// Array type used to bind a whole column in one parameter
    pub fn array_type(self) -> &'static str {
        match self {
            ColumnKind::Text => "text[]",
            ColumnKind::Int => "int4[]",
            ColumnKind::Decimal => "numeric[]",
            ColumnKind::Date => "date[]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub not_null: bool,
    pub primary_key: bool,
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        not_null: false,
        primary_key: false,
    }
}

const fn text(name: &'static str) -> ColumnSpec {
    col(name, ColumnKind::Text)
}

const fn int(name: &'static str) -> ColumnSpec {
    col(name, ColumnKind::Int)
}

const fn date(name: &'static str) -> ColumnSpec {
    col(name, ColumnKind::Date)
}

/// Identifier fragments of a CNPJ are never blank
const fn key(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        not_null: true,
        ..text(name)
    }
}

const fn code() -> ColumnSpec {
    ColumnSpec {
        not_null: true,
        primary_key: true,
        ..int("codigo")
    }
}

static COMPANY: [ColumnSpec; 7] = [
    key("cnpj_basico"),
    text("razao_social"),
    int("natureza_juridica"),
    int("qualificacao_responsavel"),
    col("capital_social", ColumnKind::Decimal),
    int("porte_empresa"),
    text("ente_federativo_responsavel"),
];

static ESTABLISHMENT: [ColumnSpec; 30] = [
    key("cnpj_basico"),
    key("cnpj_ordem"),
    key("cnpj_dv"),
    int("identificador_matriz_filial"),
    text("nome_fantasia"),
    int("situacao_cadastral"),
    date("data_situacao_cadastral"),
    int("motivo_situacao_cadastral"),
    text("nome_cidade_exterior"),
    int("pais"),
    date("data_inicio_atividade"),
    int("cnae_fiscal_principal"),
    text("cnae_fiscal_secundaria"),
    text("tipo_logradouro"),
    text("logradouro"),
    text("numero"),
    text("complemento"),
    text("bairro"),
    text("cep"),
    text("uf"),
    int("municipio"),
    text("ddd_1"),
    text("telefone_1"),
    text("ddd_2"),
    text("telefone_2"),
    text("ddd_fax"),
    text("fax"),
    text("correio_eletronico"),
    text("situacao_especial"),
    date("data_situacao_especial"),
];

static PARTNER: [ColumnSpec; 11] = [
    key("cnpj_basico"),
    int("identificador_socio"),
    text("nome_socio"),
    text("cnpj_cpf_socio"),
    int("qualificacao_socio"),
    date("data_entrada_sociedade"),
    int("pais"),
    text("representante_legal"),
    text("nome_representante"),
    int("qualificacao_representante_legal"),
    int("faixa_etaria"),
];

static TAX_REGIME: [ColumnSpec; 7] = [
    key("cnpj_basico"),
    text("opcao_pelo_simples"),
    date("data_opcao_simples"),
    date("data_exclusao_simples"),
    text("opcao_mei"),
    date("data_opcao_mei"),
    date("data_exclusao_mei"),
];

static REFERENCE: [ColumnSpec; 2] = [code(), text("descricao")];

/// Column layout of one destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub kind: RecordKind,
    pub columns: &'static [ColumnSpec],
}

impl TableSchema {
    pub fn for_kind(kind: RecordKind) -> Self {
        let columns: &'static [ColumnSpec] = match kind {
            RecordKind::Company => &COMPANY,
            RecordKind::Establishment => &ESTABLISHMENT,
            RecordKind::Partner => &PARTNER,
            RecordKind::TaxRegime => &TAX_REGIME,
            _ => &REFERENCE,
        };
        Self { kind, columns }
    }

    /// All ten tables in load order
    pub fn all() -> impl Iterator<Item = TableSchema> {
        RecordKind::ALL.into_iter().map(Self::for_kind)
    }

    pub fn table(&self) -> &'static str {
        self.kind.table()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", c.name, c.kind.sql_type());
                if c.not_null {
                    def.push_str(" NOT NULL");
                }
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        format!("CREATE TABLE {} ({})", self.table(), columns.join(", "))
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table())
    }

    /// Columnar insert: one array parameter per column, unnested into rows
    ///
    /// Keeps the bind count at the column count whatever the batch size.
    pub fn insert_sql(&self) -> String {
        let arrays: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("${}::{}", i + 1, c.kind.array_type()))
            .collect();
        format!(
            "INSERT INTO {} ({}) SELECT * FROM UNNEST({})",
            self.table(),
            self.column_names().join(", "),
            arrays.join(", ")
        )
    }
}

/// Field layout of an establishment file
///
/// Older releases publish 29 fields per record; the current layout appends
/// `data_situacao_especial`. The destination table always has 30 columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishmentLayout {
    Legacy29,
    Current30,
}

impl EstablishmentLayout {
    /// Pick the layout from a record's field count
    ///
    /// Unexpected counts use the current layout; the transformer pads or
    /// truncates them.
    pub fn detect(field_count: usize) -> Self {
        if field_count == 29 {
            EstablishmentLayout::Legacy29
        } else {
            EstablishmentLayout::Current30
        }
    }

    pub fn source_width(self) -> usize {
        match self {
            EstablishmentLayout::Legacy29 => 29,
            EstablishmentLayout::Current30 => 30,
        }
    }
}

/// Number of source fields consumed for a record of `kind`
///
/// `first_record_width` only matters for establishments, whose layout is
/// versioned.
pub fn source_width(schema: &TableSchema, first_record_width: Option<usize>) -> usize {
    match (schema.kind, first_record_width) {
        (RecordKind::Establishment, Some(n)) => EstablishmentLayout::detect(n).source_width(),
        _ => schema.width(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_counts() {
        let widths: Vec<(&str, usize)> = TableSchema::all().map(|s| (s.table(), s.width())).collect();
        assert_eq!(&widths[..4], &[("empresa", 7), ("estabelecimento", 30), ("socios", 11), ("simples", 7)]);
        assert!(widths[4..].iter().all(|(_, w)| *w == 2));
    }

    #[test]
    fn test_create_company_table() {
        let sql = TableSchema::for_kind(RecordKind::Company).create_table_sql();
        assert_eq!(
            sql,
            "CREATE TABLE empresa (cnpj_basico TEXT NOT NULL, razao_social TEXT, \
             natureza_juridica INTEGER, qualificacao_responsavel INTEGER, \
             capital_social NUMERIC(15,2), porte_empresa INTEGER, ente_federativo_responsavel TEXT)"
        );
    }

    #[test]
    fn test_reference_tables_have_code_primary_key() {
        let sql = TableSchema::for_kind(RecordKind::Municipality).create_table_sql();
        assert_eq!(
            sql,
            "CREATE TABLE municipio (codigo INTEGER NOT NULL PRIMARY KEY, descricao TEXT)"
        );
    }

    #[test]
    fn test_insert_uses_one_array_per_column() {
        let sql = TableSchema::for_kind(RecordKind::Country).insert_sql();
        assert_eq!(
            sql,
            "INSERT INTO pais (codigo, descricao) SELECT * FROM UNNEST($1::int4[], $2::text[])"
        );

        let sql = TableSchema::for_kind(RecordKind::Establishment).insert_sql();
        assert!(sql.contains("$30::date[]"));
        assert!(!sql.contains("$31"));
    }

    #[test]
    fn test_establishment_layout_detection() {
        assert_eq!(EstablishmentLayout::detect(29), EstablishmentLayout::Legacy29);
        assert_eq!(EstablishmentLayout::detect(30), EstablishmentLayout::Current30);
        assert_eq!(EstablishmentLayout::detect(31), EstablishmentLayout::Current30);

        let schema = TableSchema::for_kind(RecordKind::Establishment);
        assert_eq!(source_width(&schema, Some(29)), 29);
        assert_eq!(source_width(&schema, None), 30);

        let company = TableSchema::for_kind(RecordKind::Company);
        assert_eq!(source_width(&company, Some(29)), 7);
    }

    #[test]
    fn test_column_names_unique_per_table() {
        for schema in TableSchema::all() {
            let mut names = schema.column_names();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), schema.width(), "{}", schema.table());
        }
    }
}
