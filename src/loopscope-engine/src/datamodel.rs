// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The typed project IR: what an importer produces and the compiler
//! consumes.  The core treats a `Project` as immutable; editors produce a
//! new `Project` per edit.

use crate::common::{DimensionName, ElementName};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GraphicalFunctionKind {
    Continuous,
    Extrapolate,
    Discrete,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GraphicalFunctionScale {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, PartialEq, Debug)]
pub struct GraphicalFunction {
    pub kind: GraphicalFunctionKind,
    /// if absent, a uniform grid over x_scale is derived from y_points
    pub x_points: Option<Vec<f64>>,
    pub y_points: Vec<f64>,
    pub x_scale: GraphicalFunctionScale,
    pub y_scale: GraphicalFunctionScale,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Equation {
    Scalar(String),
    ApplyToAll(Vec<DimensionName>, String),
    /// explicit per-element equations; keys are comma-joined element names
    Arrayed(Vec<DimensionName>, Vec<(ElementName, String)>),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Stock {
    pub ident: String,
    /// the initial value
    pub equation: Equation,
    pub documentation: String,
    pub units: Option<String>,
    pub inflows: Vec<String>,
    pub outflows: Vec<String>,
    pub non_negative: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Flow {
    pub ident: String,
    pub equation: Equation,
    pub documentation: String,
    pub units: Option<String>,
    pub gf: Option<GraphicalFunction>,
    pub non_negative: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Aux {
    pub ident: String,
    pub equation: Equation,
    pub documentation: String,
    pub units: Option<String>,
    pub gf: Option<GraphicalFunction>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleReference {
    /// an ident in the enclosing model (possibly a dotted module path)
    pub src: String,
    /// an input ident inside the referenced model
    pub dst: String,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Module {
    pub ident: String,
    pub model_name: String,
    pub documentation: String,
    pub units: Option<String>,
    pub references: Vec<ModuleReference>,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Variable {
    Stock(Stock),
    Flow(Flow),
    Aux(Aux),
    Module(Module),
}

impl Variable {
    pub fn get_ident(&self) -> &str {
        match self {
            Variable::Stock(stock) => stock.ident.as_str(),
            Variable::Flow(flow) => flow.ident.as_str(),
            Variable::Aux(aux) => aux.ident.as_str(),
            Variable::Module(module) => module.ident.as_str(),
        }
    }

    pub fn get_equation(&self) -> Option<&Equation> {
        match self {
            Variable::Stock(stock) => Some(&stock.equation),
            Variable::Flow(flow) => Some(&flow.equation),
            Variable::Aux(aux) => Some(&aux.equation),
            Variable::Module(_module) => None,
        }
    }

    pub fn set_ident(&mut self, ident: String) {
        match self {
            Variable::Stock(stock) => stock.ident = ident,
            Variable::Flow(flow) => flow.ident = ident,
            Variable::Aux(aux) => aux.ident = ident,
            Variable::Module(module) => module.ident = ident,
        }
    }
}

pub mod view_element {
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub enum LabelSide {
        Top,
        Left,
        Center,
        Bottom,
        Right,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Aux {
        pub name: String,
        pub uid: i32,
        pub x: f64,
        pub y: f64,
        pub label_side: LabelSide,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Stock {
        pub name: String,
        pub uid: i32,
        pub x: f64,
        pub y: f64,
        pub label_side: LabelSide,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct FlowPoint {
        pub x: f64,
        pub y: f64,
        pub attached_to_uid: Option<i32>,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Flow {
        pub name: String,
        pub uid: i32,
        pub x: f64,
        pub y: f64,
        pub label_side: LabelSide,
        pub points: Vec<FlowPoint>,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub enum LinkShape {
        Straight,
        Arc(f64), // angle in [0, 360)
        MultiPoint(Vec<FlowPoint>),
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Link {
        pub uid: i32,
        pub from_uid: i32,
        pub to_uid: i32,
        pub shape: LinkShape,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Module {
        pub name: String,
        pub uid: i32,
        pub x: f64,
        pub y: f64,
        pub label_side: LabelSide,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Alias {
        pub uid: i32,
        pub alias_of_uid: i32,
        pub x: f64,
        pub y: f64,
        pub label_side: LabelSide,
    }

    #[derive(Clone, PartialEq, Debug)]
    pub struct Cloud {
        pub uid: i32,
        pub flow_uid: i32,
        pub x: f64,
        pub y: f64,
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum ViewElement {
    Aux(view_element::Aux),
    Stock(view_element::Stock),
    Flow(view_element::Flow),
    Link(view_element::Link),
    Module(view_element::Module),
    Alias(view_element::Alias),
    Cloud(view_element::Cloud),
}

impl ViewElement {
    pub fn get_uid(&self) -> i32 {
        match self {
            ViewElement::Aux(var) => var.uid,
            ViewElement::Stock(var) => var.uid,
            ViewElement::Flow(var) => var.uid,
            ViewElement::Link(var) => var.uid,
            ViewElement::Module(var) => var.uid,
            ViewElement::Alias(var) => var.uid,
            ViewElement::Cloud(var) => var.uid,
        }
    }

    pub fn get_name(&self) -> Option<&str> {
        match self {
            ViewElement::Aux(var) => Some(var.name.as_str()),
            ViewElement::Stock(var) => Some(var.name.as_str()),
            ViewElement::Flow(var) => Some(var.name.as_str()),
            ViewElement::Link(_var) => None,
            ViewElement::Module(var) => Some(var.name.as_str()),
            ViewElement::Alias(_var) => None,
            ViewElement::Cloud(_var) => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, PartialEq, Debug)]
pub struct StockFlow {
    pub elements: Vec<ViewElement>,
    pub view_box: Rect,
    pub zoom: f64,
}

impl StockFlow {
    pub fn get_variable_name(&self, uid: i32) -> Option<&str> {
        for element in self.elements.iter() {
            if element.get_uid() == uid {
                return element.get_name();
            }
        }

        None
    }

    /// uids referenced by links, aliases, clouds, and flow points that don't
    /// exist in this view.  Views are pass-through for the simulation core,
    /// so a broken reference is reported, not fatal.
    pub fn broken_uid_refs(&self) -> Vec<i32> {
        use std::collections::HashSet;
        let uids: HashSet<i32> = self.elements.iter().map(|e| e.get_uid()).collect();
        let mut broken = vec![];
        let mut check = |uid: i32| {
            if !uids.contains(&uid) {
                broken.push(uid);
            }
        };
        for element in self.elements.iter() {
            match element {
                ViewElement::Link(link) => {
                    check(link.from_uid);
                    check(link.to_uid);
                }
                ViewElement::Alias(alias) => check(alias.alias_of_uid),
                ViewElement::Cloud(cloud) => check(cloud.flow_uid),
                ViewElement::Flow(flow) => {
                    for point in flow.points.iter() {
                        if let Some(uid) = point.attached_to_uid {
                            check(uid);
                        }
                    }
                }
                _ => {}
            }
        }
        broken
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum View {
    StockFlow(StockFlow),
}

#[derive(Clone, PartialEq, Debug)]
pub struct Model {
    pub name: String,
    pub variables: Vec<Variable>,
    pub views: Vec<View>,
}

impl Model {
    pub fn get_variable(&self, ident: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.get_ident() == ident)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SimMethod {
    Euler,
    RungeKutta4,
}

/// Dt is a UI consideration: models sometimes specify exact fractions that
/// don't display neatly, like 1/3.
#[derive(Clone, PartialEq, Debug)]
pub enum Dt {
    Dt(f64),
    Reciprocal(f64),
}

impl Default for Dt {
    fn default() -> Self {
        Dt::Dt(1.0)
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct SimSpecs {
    pub start: f64,
    pub stop: f64,
    pub dt: Dt,
    pub save_step: Option<Dt>,
    pub sim_method: SimMethod,
    pub time_units: Option<String>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Dimension {
    pub name: String,
    pub elements: Vec<String>,
}

impl Dimension {
    pub fn get_offset(&self, subscript: &str) -> Option<usize> {
        self.elements.iter().position(|element| element == subscript)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Project {
    pub name: String,
    pub sim_specs: SimSpecs,
    pub dimensions: Vec<Dimension>,
    pub models: Vec<Model>,
}

impl Project {
    pub fn get_model(&self, model_name: &str) -> Option<&Model> {
        self.models
            .iter()
            .find(|m| m.name == model_name || (model_name == "main" && m.name.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_uid_refs() {
        let view = StockFlow {
            elements: vec![
                ViewElement::Aux(view_element::Aux {
                    name: "a".to_string(),
                    uid: 1,
                    x: 0.0,
                    y: 0.0,
                    label_side: view_element::LabelSide::Bottom,
                }),
                ViewElement::Link(view_element::Link {
                    uid: 2,
                    from_uid: 1,
                    to_uid: 3,
                    shape: view_element::LinkShape::Straight,
                }),
            ],
            view_box: Rect::default(),
            zoom: 1.0,
        };
        assert_eq!(vec![3], view.broken_uid_refs());
    }
}
