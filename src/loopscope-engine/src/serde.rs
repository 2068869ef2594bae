// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Conversions between the typed datamodel and the on-disk protobuf form,
//! plus the public `serialize`/`deserialize` entry points.

use prost::Message;

use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::datamodel::{
    view_element, Aux, Dimension, Dt, Equation, Flow, GraphicalFunction, GraphicalFunctionKind,
    GraphicalFunctionScale, Model, Module, ModuleReference, Project, Rect, SimMethod, SimSpecs,
    Stock, StockFlow, Variable, View, ViewElement,
};
use crate::project_io;

pub fn serialize(project: &Project) -> Vec<u8> {
    let pb = project_io::Project::from(project.clone());
    pb.encode_to_vec()
}

pub fn deserialize(bytes: &[u8]) -> Result<Project> {
    match project_io::Project::decode(bytes) {
        Ok(pb) => Ok(Project::from(pb)),
        Err(err) => Err(Error::new(
            ErrorKind::Import,
            ErrorCode::ProtobufDecode,
            Some(err.to_string()),
        )),
    }
}

impl From<Dt> for project_io::Dt {
    fn from(dt: Dt) -> Self {
        match dt {
            Dt::Dt(value) => project_io::Dt {
                value,
                is_reciprocal: false,
            },
            Dt::Reciprocal(value) => project_io::Dt {
                value,
                is_reciprocal: true,
            },
        }
    }
}

impl From<project_io::Dt> for Dt {
    fn from(dt: project_io::Dt) -> Self {
        if dt.is_reciprocal {
            Dt::Reciprocal(dt.value)
        } else {
            Dt::Dt(dt.value)
        }
    }
}

#[test]
fn test_dt_roundtrip() {
    let cases: &[Dt] = &[Dt::Dt(7.7), Dt::Reciprocal(7.7)];
    for expected in cases {
        let expected = expected.clone();
        let actual = Dt::from(project_io::Dt::from(expected.clone()));
        assert_eq!(expected, actual);
    }
}

impl From<SimMethod> for project_io::SimMethod {
    fn from(sim_method: SimMethod) -> Self {
        match sim_method {
            SimMethod::Euler => project_io::SimMethod::Euler,
            SimMethod::RungeKutta4 => project_io::SimMethod::RungeKutta4,
        }
    }
}

impl From<project_io::SimMethod> for SimMethod {
    fn from(sim_method: project_io::SimMethod) -> Self {
        match sim_method {
            project_io::SimMethod::Euler => SimMethod::Euler,
            project_io::SimMethod::RungeKutta4 => SimMethod::RungeKutta4,
        }
    }
}

#[test]
fn test_sim_method_roundtrip() {
    let cases: &[SimMethod] = &[SimMethod::Euler, SimMethod::RungeKutta4];
    for expected in cases {
        let expected = expected.clone();
        let actual = SimMethod::from(project_io::SimMethod::from(expected.clone()));
        assert_eq!(expected, actual);
    }

    // protobuf enums are open; unknown values fall back to Euler
    assert_eq!(
        SimMethod::Euler,
        SimMethod::from(project_io::SimMethod::try_from(666).unwrap_or(project_io::SimMethod::Euler))
    );
}

impl From<SimSpecs> for project_io::SimSpecs {
    fn from(sim_specs: SimSpecs) -> Self {
        project_io::SimSpecs {
            start: sim_specs.start,
            stop: sim_specs.stop,
            dt: Some(project_io::Dt::from(sim_specs.dt)),
            save_step: sim_specs.save_step.map(project_io::Dt::from),
            sim_method: project_io::SimMethod::from(sim_specs.sim_method) as i32,
            time_units: sim_specs.time_units,
        }
    }
}

impl From<project_io::SimSpecs> for SimSpecs {
    fn from(sim_specs: project_io::SimSpecs) -> Self {
        SimSpecs {
            start: sim_specs.start,
            stop: sim_specs.stop,
            dt: Dt::from(sim_specs.dt.unwrap_or(project_io::Dt {
                value: 1.0,
                is_reciprocal: false,
            })),
            save_step: sim_specs.save_step.map(Dt::from),
            sim_method: SimMethod::from(
                project_io::SimMethod::try_from(sim_specs.sim_method)
                    .unwrap_or(project_io::SimMethod::Euler),
            ),
            time_units: sim_specs.time_units,
        }
    }
}

#[test]
fn test_sim_specs_roundtrip() {
    let cases: &[SimSpecs] = &[
        SimSpecs {
            start: 127.0,
            stop: 129.9,
            dt: Dt::Reciprocal(4.0),
            save_step: Some(Dt::Dt(1.0)),
            sim_method: SimMethod::Euler,
            time_units: Some("years".to_string()),
        },
        SimSpecs {
            start: 127.0,
            stop: 129.9,
            dt: Dt::Dt(5.0),
            save_step: None,
            sim_method: SimMethod::RungeKutta4,
            time_units: None,
        },
    ];
    for expected in cases {
        let expected = expected.clone();
        let actual = SimSpecs::from(project_io::SimSpecs::from(expected.clone()));
        assert_eq!(expected, actual);
    }
}

impl From<Dimension> for project_io::Dimension {
    fn from(dimension: Dimension) -> Self {
        project_io::Dimension {
            name: dimension.name,
            elements: dimension.elements,
        }
    }
}

impl From<project_io::Dimension> for Dimension {
    fn from(dimension: project_io::Dimension) -> Self {
        Dimension {
            name: dimension.name,
            elements: dimension.elements,
        }
    }
}

impl From<GraphicalFunctionKind> for project_io::graphical_function::Kind {
    fn from(kind: GraphicalFunctionKind) -> Self {
        match kind {
            GraphicalFunctionKind::Continuous => project_io::graphical_function::Kind::Continuous,
            GraphicalFunctionKind::Extrapolate => project_io::graphical_function::Kind::Extrapolate,
            GraphicalFunctionKind::Discrete => project_io::graphical_function::Kind::Discrete,
        }
    }
}

impl From<project_io::graphical_function::Kind> for GraphicalFunctionKind {
    fn from(kind: project_io::graphical_function::Kind) -> Self {
        match kind {
            project_io::graphical_function::Kind::Continuous => GraphicalFunctionKind::Continuous,
            project_io::graphical_function::Kind::Extrapolate => GraphicalFunctionKind::Extrapolate,
            project_io::graphical_function::Kind::Discrete => GraphicalFunctionKind::Discrete,
        }
    }
}

impl From<GraphicalFunctionScale> for project_io::graphical_function::Scale {
    fn from(scale: GraphicalFunctionScale) -> Self {
        project_io::graphical_function::Scale {
            min: scale.min,
            max: scale.max,
        }
    }
}

impl From<project_io::graphical_function::Scale> for GraphicalFunctionScale {
    fn from(scale: project_io::graphical_function::Scale) -> Self {
        GraphicalFunctionScale {
            min: scale.min,
            max: scale.max,
        }
    }
}

impl From<GraphicalFunction> for project_io::GraphicalFunction {
    fn from(gf: GraphicalFunction) -> Self {
        project_io::GraphicalFunction {
            kind: project_io::graphical_function::Kind::from(gf.kind) as i32,
            x_points: gf.x_points.unwrap_or_default(),
            y_points: gf.y_points,
            x_scale: Some(project_io::graphical_function::Scale::from(gf.x_scale)),
            y_scale: Some(project_io::graphical_function::Scale::from(gf.y_scale)),
        }
    }
}

impl From<project_io::GraphicalFunction> for GraphicalFunction {
    fn from(gf: project_io::GraphicalFunction) -> Self {
        GraphicalFunction {
            kind: GraphicalFunctionKind::from(
                project_io::graphical_function::Kind::try_from(gf.kind)
                    .unwrap_or(project_io::graphical_function::Kind::Continuous),
            ),
            x_points: if gf.x_points.is_empty() {
                None
            } else {
                Some(gf.x_points)
            },
            y_points: gf.y_points,
            x_scale: GraphicalFunctionScale::from(gf.x_scale.unwrap_or_default()),
            y_scale: GraphicalFunctionScale::from(gf.y_scale.unwrap_or_default()),
        }
    }
}

#[test]
fn test_graphical_function_roundtrip() {
    let cases: &[GraphicalFunction] = &[
        GraphicalFunction {
            kind: GraphicalFunctionKind::Discrete,
            x_points: Some(vec![0.0, 1.0, 2.0]),
            y_points: vec![4.0, 5.0, 6.0],
            x_scale: GraphicalFunctionScale { min: 0.0, max: 2.0 },
            y_scale: GraphicalFunctionScale { min: 4.0, max: 6.0 },
        },
        GraphicalFunction {
            kind: GraphicalFunctionKind::Continuous,
            x_points: None,
            y_points: vec![1.0, 2.0],
            x_scale: GraphicalFunctionScale { min: 0.0, max: 1.0 },
            y_scale: GraphicalFunctionScale { min: 1.0, max: 2.0 },
        },
    ];
    for expected in cases {
        let expected = expected.clone();
        let actual = GraphicalFunction::from(project_io::GraphicalFunction::from(expected.clone()));
        assert_eq!(expected, actual);
    }
}

impl From<Equation> for project_io::Equation {
    fn from(eqn: Equation) -> Self {
        let kind = match eqn {
            Equation::Scalar(equation) => {
                project_io::equation::Kind::Scalar(project_io::equation::Scalar { equation })
            }
            Equation::ApplyToAll(dimension_names, equation) => {
                project_io::equation::Kind::ApplyToAll(project_io::equation::ApplyToAll {
                    dimension_names,
                    equation,
                })
            }
            Equation::Arrayed(dimension_names, elements) => {
                project_io::equation::Kind::Arrayed(project_io::equation::Arrayed {
                    dimension_names,
                    elements: elements
                        .into_iter()
                        .map(|(subscript, equation)| project_io::equation::Element {
                            subscript,
                            equation,
                        })
                        .collect(),
                })
            }
        };
        project_io::Equation { kind: Some(kind) }
    }
}

impl From<project_io::Equation> for Equation {
    fn from(eqn: project_io::Equation) -> Self {
        match eqn.kind {
            Some(project_io::equation::Kind::Scalar(scalar)) => Equation::Scalar(scalar.equation),
            Some(project_io::equation::Kind::ApplyToAll(a2a)) => {
                Equation::ApplyToAll(a2a.dimension_names, a2a.equation)
            }
            Some(project_io::equation::Kind::Arrayed(arrayed)) => Equation::Arrayed(
                arrayed.dimension_names,
                arrayed
                    .elements
                    .into_iter()
                    .map(|element| (element.subscript, element.equation))
                    .collect(),
            ),
            None => Equation::Scalar("".to_string()),
        }
    }
}

#[test]
fn test_equation_roundtrip() {
    let cases: &[Equation] = &[
        Equation::Scalar("a+1".to_string()),
        Equation::ApplyToAll(vec!["dim".to_string()], "b * 2".to_string()),
        Equation::Arrayed(
            vec!["dim".to_string()],
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
        ),
    ];
    for expected in cases {
        let expected = expected.clone();
        let actual = Equation::from(project_io::Equation::from(expected.clone()));
        assert_eq!(expected, actual);
    }
}

impl From<Variable> for project_io::Variable {
    fn from(var: Variable) -> Self {
        let v = match var {
            Variable::Stock(stock) => project_io::variable::V::Stock(project_io::Stock {
                ident: stock.ident,
                equation: Some(project_io::Equation::from(stock.equation)),
                documentation: stock.documentation,
                units: stock.units,
                inflows: stock.inflows,
                outflows: stock.outflows,
                non_negative: stock.non_negative,
            }),
            Variable::Flow(flow) => project_io::variable::V::Flow(project_io::Flow {
                ident: flow.ident,
                equation: Some(project_io::Equation::from(flow.equation)),
                documentation: flow.documentation,
                units: flow.units,
                gf: flow.gf.map(project_io::GraphicalFunction::from),
                non_negative: flow.non_negative,
            }),
            Variable::Aux(aux) => project_io::variable::V::Aux(project_io::Aux {
                ident: aux.ident,
                equation: Some(project_io::Equation::from(aux.equation)),
                documentation: aux.documentation,
                units: aux.units,
                gf: aux.gf.map(project_io::GraphicalFunction::from),
            }),
            Variable::Module(module) => project_io::variable::V::Module(project_io::Module {
                ident: module.ident,
                model_name: module.model_name,
                documentation: module.documentation,
                units: module.units,
                references: module
                    .references
                    .into_iter()
                    .map(|r| project_io::ModuleReference {
                        src: r.src,
                        dst: r.dst,
                    })
                    .collect(),
            }),
        };
        project_io::Variable { v: Some(v) }
    }
}

impl From<project_io::Variable> for Variable {
    fn from(var: project_io::Variable) -> Self {
        match var.v {
            Some(project_io::variable::V::Stock(stock)) => Variable::Stock(Stock {
                ident: stock.ident,
                equation: Equation::from(stock.equation.unwrap_or_default()),
                documentation: stock.documentation,
                units: stock.units,
                inflows: stock.inflows,
                outflows: stock.outflows,
                non_negative: stock.non_negative,
            }),
            Some(project_io::variable::V::Flow(flow)) => Variable::Flow(Flow {
                ident: flow.ident,
                equation: Equation::from(flow.equation.unwrap_or_default()),
                documentation: flow.documentation,
                units: flow.units,
                gf: flow.gf.map(GraphicalFunction::from),
                non_negative: flow.non_negative,
            }),
            Some(project_io::variable::V::Aux(aux)) => Variable::Aux(Aux {
                ident: aux.ident,
                equation: Equation::from(aux.equation.unwrap_or_default()),
                documentation: aux.documentation,
                units: aux.units,
                gf: aux.gf.map(GraphicalFunction::from),
            }),
            Some(project_io::variable::V::Module(module)) => Variable::Module(Module {
                ident: module.ident,
                model_name: module.model_name,
                documentation: module.documentation,
                units: module.units,
                references: module
                    .references
                    .into_iter()
                    .map(|r| ModuleReference {
                        src: r.src,
                        dst: r.dst,
                    })
                    .collect(),
            }),
            // an empty variable decodes as an empty aux
            None => Variable::Aux(Aux {
                ident: "".to_string(),
                equation: Equation::Scalar("".to_string()),
                documentation: "".to_string(),
                units: None,
                gf: None,
            }),
        }
    }
}

impl From<view_element::LabelSide> for project_io::view_element::LabelSide {
    fn from(side: view_element::LabelSide) -> Self {
        match side {
            view_element::LabelSide::Top => project_io::view_element::LabelSide::Top,
            view_element::LabelSide::Left => project_io::view_element::LabelSide::Left,
            view_element::LabelSide::Center => project_io::view_element::LabelSide::Center,
            view_element::LabelSide::Bottom => project_io::view_element::LabelSide::Bottom,
            view_element::LabelSide::Right => project_io::view_element::LabelSide::Right,
        }
    }
}

impl From<project_io::view_element::LabelSide> for view_element::LabelSide {
    fn from(side: project_io::view_element::LabelSide) -> Self {
        match side {
            project_io::view_element::LabelSide::Top => view_element::LabelSide::Top,
            project_io::view_element::LabelSide::Left => view_element::LabelSide::Left,
            project_io::view_element::LabelSide::Center => view_element::LabelSide::Center,
            project_io::view_element::LabelSide::Bottom => view_element::LabelSide::Bottom,
            project_io::view_element::LabelSide::Right => view_element::LabelSide::Right,
        }
    }
}

fn label_side_from_i32(side: i32) -> view_element::LabelSide {
    view_element::LabelSide::from(
        project_io::view_element::LabelSide::try_from(side)
            .unwrap_or(project_io::view_element::LabelSide::Bottom),
    )
}

impl From<view_element::FlowPoint> for project_io::view_element::FlowPoint {
    fn from(point: view_element::FlowPoint) -> Self {
        project_io::view_element::FlowPoint {
            x: point.x,
            y: point.y,
            attached_to_uid: point.attached_to_uid,
        }
    }
}

impl From<project_io::view_element::FlowPoint> for view_element::FlowPoint {
    fn from(point: project_io::view_element::FlowPoint) -> Self {
        view_element::FlowPoint {
            x: point.x,
            y: point.y,
            attached_to_uid: point.attached_to_uid,
        }
    }
}

impl From<ViewElement> for project_io::ViewElement {
    fn from(element: ViewElement) -> Self {
        use project_io::view_element as pb;
        let element = match element {
            ViewElement::Aux(aux) => pb::Element::Aux(pb::Aux {
                name: aux.name,
                uid: aux.uid,
                x: aux.x,
                y: aux.y,
                label_side: pb::LabelSide::from(aux.label_side) as i32,
            }),
            ViewElement::Stock(stock) => pb::Element::Stock(pb::Stock {
                name: stock.name,
                uid: stock.uid,
                x: stock.x,
                y: stock.y,
                label_side: pb::LabelSide::from(stock.label_side) as i32,
            }),
            ViewElement::Flow(flow) => pb::Element::Flow(pb::Flow {
                name: flow.name,
                uid: flow.uid,
                x: flow.x,
                y: flow.y,
                label_side: pb::LabelSide::from(flow.label_side) as i32,
                points: flow
                    .points
                    .into_iter()
                    .map(pb::FlowPoint::from)
                    .collect(),
            }),
            ViewElement::Link(link) => pb::Element::Link(pb::Link {
                uid: link.uid,
                from_uid: link.from_uid,
                to_uid: link.to_uid,
                shape: Some(match link.shape {
                    view_element::LinkShape::Straight => pb::link::Shape::Straight(true),
                    view_element::LinkShape::Arc(angle) => pb::link::Shape::Arc(angle),
                    view_element::LinkShape::MultiPoint(points) => {
                        pb::link::Shape::MultiPoint(pb::FlowPoints {
                            points: points.into_iter().map(pb::FlowPoint::from).collect(),
                        })
                    }
                }),
            }),
            ViewElement::Module(module) => pb::Element::Module(pb::Module {
                name: module.name,
                uid: module.uid,
                x: module.x,
                y: module.y,
                label_side: pb::LabelSide::from(module.label_side) as i32,
            }),
            ViewElement::Alias(alias) => pb::Element::Alias(pb::Alias {
                uid: alias.uid,
                alias_of_uid: alias.alias_of_uid,
                x: alias.x,
                y: alias.y,
                label_side: pb::LabelSide::from(alias.label_side) as i32,
            }),
            ViewElement::Cloud(cloud) => pb::Element::Cloud(pb::Cloud {
                uid: cloud.uid,
                flow_uid: cloud.flow_uid,
                x: cloud.x,
                y: cloud.y,
            }),
        };
        project_io::ViewElement {
            element: Some(element),
        }
    }
}

impl From<project_io::ViewElement> for ViewElement {
    fn from(element: project_io::ViewElement) -> Self {
        use project_io::view_element as pb;
        match element.element {
            Some(pb::Element::Aux(aux)) => ViewElement::Aux(view_element::Aux {
                name: aux.name,
                uid: aux.uid,
                x: aux.x,
                y: aux.y,
                label_side: label_side_from_i32(aux.label_side),
            }),
            Some(pb::Element::Stock(stock)) => ViewElement::Stock(view_element::Stock {
                name: stock.name,
                uid: stock.uid,
                x: stock.x,
                y: stock.y,
                label_side: label_side_from_i32(stock.label_side),
            }),
            Some(pb::Element::Flow(flow)) => ViewElement::Flow(view_element::Flow {
                name: flow.name,
                uid: flow.uid,
                x: flow.x,
                y: flow.y,
                label_side: label_side_from_i32(flow.label_side),
                points: flow
                    .points
                    .into_iter()
                    .map(view_element::FlowPoint::from)
                    .collect(),
            }),
            Some(pb::Element::Link(link)) => ViewElement::Link(view_element::Link {
                uid: link.uid,
                from_uid: link.from_uid,
                to_uid: link.to_uid,
                shape: match link.shape {
                    Some(pb::link::Shape::Arc(angle)) => view_element::LinkShape::Arc(angle),
                    Some(pb::link::Shape::MultiPoint(points)) => {
                        view_element::LinkShape::MultiPoint(
                            points
                                .points
                                .into_iter()
                                .map(view_element::FlowPoint::from)
                                .collect(),
                        )
                    }
                    Some(pb::link::Shape::Straight(_)) | None => {
                        view_element::LinkShape::Straight
                    }
                },
            }),
            Some(pb::Element::Module(module)) => ViewElement::Module(view_element::Module {
                name: module.name,
                uid: module.uid,
                x: module.x,
                y: module.y,
                label_side: label_side_from_i32(module.label_side),
            }),
            Some(pb::Element::Alias(alias)) => ViewElement::Alias(view_element::Alias {
                uid: alias.uid,
                alias_of_uid: alias.alias_of_uid,
                x: alias.x,
                y: alias.y,
                label_side: label_side_from_i32(alias.label_side),
            }),
            Some(pb::Element::Cloud(cloud)) => ViewElement::Cloud(view_element::Cloud {
                uid: cloud.uid,
                flow_uid: cloud.flow_uid,
                x: cloud.x,
                y: cloud.y,
            }),
            // an empty element decodes as an off-screen cloud
            None => ViewElement::Cloud(view_element::Cloud {
                uid: -1,
                flow_uid: -1,
                x: 0.0,
                y: 0.0,
            }),
        }
    }
}

impl From<Rect> for project_io::Rect {
    fn from(rect: Rect) -> Self {
        project_io::Rect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

impl From<project_io::Rect> for Rect {
    fn from(rect: project_io::Rect) -> Self {
        Rect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

impl From<View> for project_io::View {
    fn from(view: View) -> Self {
        match view {
            View::StockFlow(sf) => project_io::View {
                elements: sf
                    .elements
                    .into_iter()
                    .map(project_io::ViewElement::from)
                    .collect(),
                view_box: Some(project_io::Rect::from(sf.view_box)),
                zoom: sf.zoom,
            },
        }
    }
}

impl From<project_io::View> for View {
    fn from(view: project_io::View) -> Self {
        View::StockFlow(StockFlow {
            elements: view.elements.into_iter().map(ViewElement::from).collect(),
            view_box: Rect::from(view.view_box.unwrap_or_default()),
            zoom: if view.zoom == 0.0 { 1.0 } else { view.zoom },
        })
    }
}

impl From<Model> for project_io::Model {
    fn from(model: Model) -> Self {
        project_io::Model {
            name: model.name,
            variables: model
                .variables
                .into_iter()
                .map(project_io::Variable::from)
                .collect(),
            views: model.views.into_iter().map(project_io::View::from).collect(),
        }
    }
}

impl From<project_io::Model> for Model {
    fn from(model: project_io::Model) -> Self {
        Model {
            name: model.name,
            variables: model.variables.into_iter().map(Variable::from).collect(),
            views: model.views.into_iter().map(View::from).collect(),
        }
    }
}

impl From<Project> for project_io::Project {
    fn from(project: Project) -> Self {
        project_io::Project {
            name: project.name,
            sim_specs: Some(project_io::SimSpecs::from(project.sim_specs)),
            dimensions: project
                .dimensions
                .into_iter()
                .map(project_io::Dimension::from)
                .collect(),
            models: project
                .models
                .into_iter()
                .map(project_io::Model::from)
                .collect(),
        }
    }
}

impl From<project_io::Project> for Project {
    fn from(project: project_io::Project) -> Self {
        Project {
            name: project.name,
            sim_specs: SimSpecs::from(project.sim_specs.unwrap_or(project_io::SimSpecs {
                start: 0.0,
                stop: 10.0,
                dt: None,
                save_step: None,
                sim_method: 0,
                time_units: None,
            })),
            dimensions: project
                .dimensions
                .into_iter()
                .map(Dimension::from)
                .collect(),
            models: project.models.into_iter().map(Model::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> Project {
        Project {
            name: "bass".to_string(),
            sim_specs: SimSpecs {
                start: 0.0,
                stop: 15.0,
                dt: Dt::Dt(0.125),
                save_step: Some(Dt::Dt(0.25)),
                sim_method: SimMethod::Euler,
                time_units: Some("months".to_string()),
            },
            dimensions: vec![Dimension {
                name: "region".to_string(),
                elements: vec!["north".to_string(), "south".to_string()],
            }],
            models: vec![Model {
                name: "main".to_string(),
                variables: vec![
                    Variable::Stock(Stock {
                        ident: "adopters".to_string(),
                        equation: Equation::Scalar("1".to_string()),
                        documentation: "people who have adopted".to_string(),
                        units: Some("people".to_string()),
                        inflows: vec!["adopting".to_string()],
                        outflows: vec![],
                        non_negative: false,
                    }),
                    Variable::Flow(Flow {
                        ident: "adopting".to_string(),
                        equation: Equation::Scalar(
                            "potential_adopters * 0.015 * adopters / 1000000".to_string(),
                        ),
                        documentation: "".to_string(),
                        units: None,
                        gf: Some(GraphicalFunction {
                            kind: GraphicalFunctionKind::Continuous,
                            x_points: None,
                            y_points: vec![0.0, 0.5, 1.0],
                            x_scale: GraphicalFunctionScale { min: 0.0, max: 1.0 },
                            y_scale: GraphicalFunctionScale { min: 0.0, max: 1.0 },
                        }),
                        non_negative: true,
                    }),
                    Variable::Aux(Aux {
                        ident: "by_region".to_string(),
                        equation: Equation::ApplyToAll(
                            vec!["region".to_string()],
                            "adopters * 2".to_string(),
                        ),
                        documentation: "".to_string(),
                        units: None,
                        gf: None,
                    }),
                    Variable::Module(Module {
                        ident: "sector".to_string(),
                        model_name: "sector_model".to_string(),
                        documentation: "".to_string(),
                        units: None,
                        references: vec![ModuleReference {
                            src: "adopters".to_string(),
                            dst: "input".to_string(),
                        }],
                    }),
                ],
                views: vec![View::StockFlow(StockFlow {
                    elements: vec![
                        ViewElement::Stock(view_element::Stock {
                            name: "adopters".to_string(),
                            uid: 1,
                            x: 100.0,
                            y: 100.0,
                            label_side: view_element::LabelSide::Bottom,
                        }),
                        ViewElement::Link(view_element::Link {
                            uid: 2,
                            from_uid: 1,
                            to_uid: 1,
                            shape: view_element::LinkShape::Arc(45.0),
                        }),
                        ViewElement::Cloud(view_element::Cloud {
                            uid: 3,
                            flow_uid: 1,
                            x: 15.0,
                            y: 25.0,
                        }),
                    ],
                    view_box: Rect {
                        x: 0.0,
                        y: 0.0,
                        width: 800.0,
                        height: 600.0,
                    },
                    zoom: 1.5,
                })],
            }],
        }
    }

    #[test]
    fn test_project_roundtrip() {
        let expected = sample_project();
        let bytes = serialize(&expected);
        let actual = deserialize(&bytes).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        // a wire-type/field mismatch is a decode error, not a panic
        let err = deserialize(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(ErrorCode::ProtobufDecode, err.code);
    }

    #[test]
    fn test_serialize_deterministic() {
        let project = sample_project();
        assert_eq!(serialize(&project), serialize(&project));
    }
}
